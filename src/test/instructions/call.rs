use crate::error::RuntimeError;
use crate::interpreter::Status;
use crate::test::{harness, harness_sized, run_ints};

#[test]
fn argument_writes_reach_the_caller() {
    assert_eq!(
        run_ints(
            "static v 0\n\
             proc set x\nmove x 10\nret\n\
             proc init\ncall set v\nmove printint v\nret\n"
        ),
        vec![10]
    );
}

#[test]
fn immediate_actual_is_readable_and_writable() {
    // writing an argument whose actual was an immediate lands in the
    // slot, so the later read observes it
    assert_eq!(
        run_ints(
            "proc bump x\nadd x 1\nmove printint x\nret\n\
             proc init\ncall bump 41\nret\n"
        ),
        vec![42]
    );
}

#[test]
fn array_slice_argument() {
    assert_eq!(
        run_ints(
            "static arr ints 10 20 30\n\
             proc second x\nmove printint x:1\nret\n\
             proc init\ncall second arr:1\nret\n"
        ),
        vec![30]
    );
}

#[test]
fn length_of_sliced_argument() {
    assert_eq!(
        run_ints(
            "static arr ints 10 20 30\n\
             proc len x\nmove printint x:\nret\n\
             proc init\ncall len arr:1\nret\n"
        ),
        vec![2]
    );
}

#[test]
fn length_of_immediate_actual_is_one() {
    assert_eq!(
        run_ints(
            "proc len x\nmove printint x:\nret\n\
             proc init\ncall len 9\nret\n"
        ),
        vec![1]
    );
}

#[test]
fn arguments_chain_through_nested_calls() {
    assert_eq!(
        run_ints(
            "static v 0\n\
             proc inner y\nmove y 9\nret\n\
             proc outer x\ncall inner x\nret\n\
             proc init\ncall outer v\nmove printint v\nret\n"
        ),
        vec![9]
    );
}

#[test]
fn locals_are_initialized_on_entry() {
    assert_eq!(
        run_ints(
            "proc f\nlocal a 7\nlocal s string \"x\"\nmove printint a\nret\n\
             proc init\ncall f\ncall f\nret\n"
        ),
        vec![7, 7]
    );
}

#[test]
fn out_of_range_index_through_argument() {
    let mut h = harness(
        "static arr ints 3\nstatic i 5\n\
         proc get x\nmove printint x:i\nret\n\
         proc init\ncall get arr\nret\n",
    )
    .expect("compile failed");
    assert_eq!(h.run(), Err(RuntimeError::Faulted(Status::OutOfRange)));
}

#[test]
fn float_as_index_faults() {
    let mut h = harness(
        "static arr ints 3\nstatic f floats 1.0\n\
         proc init\nmove printint arr:f\nret\n",
    )
    .expect("compile failed");
    assert_eq!(h.run(), Err(RuntimeError::Faulted(Status::FloatAsIndex)));
}

#[test]
fn call_stack_exhaustion_faults() {
    let mut h = harness_sized("proc spin\ncall spin\nret\nproc init\ncall spin\nret\n", 4)
        .expect("compile failed");
    assert_eq!(h.run(), Err(RuntimeError::Faulted(Status::StackOverflow)));
}

#[test]
fn arity_mismatch_rejected() {
    assert!(harness(
        "proc two a b\nret\nproc init\ncall two 1\nret\n"
    )
    .is_err());
}

#[test]
fn unknown_procedure_rejected() {
    assert!(harness("proc init\ncall missing\nret\n").is_err());
}
