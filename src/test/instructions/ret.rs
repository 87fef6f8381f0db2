use crate::interpreter::Status;
use crate::test::{harness, run_ints};

#[test]
fn returning_from_entry_ends_the_run() {
    let mut h = harness("proc init\nret\n").expect("compile failed");
    h.run().expect("run failed");
    assert_eq!(h.vm.status(), Status::Ready);
}

#[test]
fn returns_resume_the_caller() {
    assert_eq!(
        run_ints(
            "proc one\nmove printint 1\nret\n\
             proc init\ncall one\nmove printint 2\ncall one\nmove printint 3\nret\n"
        ),
        vec![1, 2, 1, 3]
    );
}
