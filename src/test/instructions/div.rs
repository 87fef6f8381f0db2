use crate::error::RuntimeError;
use crate::interpreter::Status;
use crate::test::{harness, run_ints};

#[test]
fn int_division_truncates() {
    assert_eq!(
        run_ints("static a 7\nproc init\ndiv a 2\nmove printint a\nret\n"),
        vec![3]
    );
}

#[test]
fn float_division() {
    let mut h = harness("static f floats 1.0\nproc init\ndiv f 4\nmove printfloat f\nret\n")
        .expect("compile failed");
    h.run().expect("run failed");
    assert_eq!(*h.floats.borrow(), vec![0.25]);
}

#[test]
fn int_division_by_zero_faults() {
    let mut h = harness("static a 7\nstatic z 0\nproc init\ndiv a z\nret\n")
        .expect("compile failed");
    assert_eq!(
        h.run(),
        Err(RuntimeError::Faulted(Status::InvalidInstruction))
    );
    assert_eq!(h.vm.status(), Status::InvalidInstruction);
}
