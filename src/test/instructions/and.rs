use crate::error::RuntimeError;
use crate::interpreter::Status;
use crate::test::{harness, run_ints};

#[test]
fn int_int() {
    assert_eq!(
        run_ints("static a 12\nproc init\nand a 10\nmove printint a\nret\n"),
        vec![8]
    );
}

#[test]
fn float_source_faults() {
    let mut h = harness(
        "static a 12\nstatic f floats 1.0\nproc init\nand a f\nret\n",
    )
    .expect("compile failed");
    assert_eq!(
        h.run(),
        Err(RuntimeError::Faulted(Status::InvalidInstruction))
    );
}

#[test]
fn float_destination_faults_even_with_immediate_source() {
    let mut h = harness("static f floats 1.0\nproc init\nand f 3\nret\n").expect("compile failed");
    assert_eq!(
        h.run(),
        Err(RuntimeError::Faulted(Status::InvalidInstruction))
    );
}
