use crate::error::RuntimeError;
use crate::interpreter::Status;
use crate::test::{harness, run_ints};

#[test]
fn basic() {
    assert_eq!(
        run_ints("static a 3\nproc init\nshl a 4\nmove printint a\nret\n"),
        vec![48]
    );
}

#[test]
fn float_amount_is_truncated() {
    assert_eq!(
        run_ints(
            "static a 1\nstatic n floats 2.9\nproc init\n\
             shl a n\nmove printint a\nret\n"
        ),
        vec![4]
    );
}

#[test]
fn float_destination_faults() {
    let mut h = harness("static f floats 1.0\nproc init\nshl f 1\nret\n").expect("compile failed");
    assert_eq!(
        h.run(),
        Err(RuntimeError::Faulted(Status::InvalidInstruction))
    );
}
