use crate::interpreter::Status;
use crate::test::{harness, run_ints};

#[test]
fn skips_over_code() {
    assert_eq!(
        run_ints(
            "static a 0\nproc init\njump past\nmove a 1\nlabel past\n\
             move printint a\nret\n"
        ),
        vec![0]
    );
}

#[test]
fn jump_to_self_ends_execution() {
    let mut h = harness("proc init\nlabel spin\njump spin\nret\n").expect("compile failed");
    h.run().expect("run failed");
    assert_eq!(h.vm.status(), Status::Ready);
}

#[test]
fn backward_loop() {
    assert_eq!(
        run_ints(
            "static i 0\nproc init\nlabel top\nadd i 1\ncmp i 3\njumpl top\n\
             move printint i\nret\n"
        ),
        vec![3]
    );
}

#[test]
fn label_in_other_procedure_rejected() {
    assert!(harness(
        "proc other\nlabel there\nret\nproc init\njump there\nret\n"
    )
    .is_err());
}
