use crate::test::{harness, run_ints};

#[test]
fn int_int() {
    assert_eq!(
        run_ints("static a 5\nproc init\nadd a 3\nmove printint a\nret\n"),
        vec![8]
    );
}

#[test]
fn float_source_int_destination_truncates() {
    assert_eq!(
        run_ints(
            "static i 10\nstatic f floats 2.5\nproc init\n\
             add i f\nmove printint i\nret\n"
        ),
        vec![12]
    );
}

#[test]
fn int_source_float_destination() {
    let mut h = harness(
        "static f floats 1.5\nstatic i 2\nproc init\n\
         add f i\nmove printfloat f\nret\n",
    )
    .expect("compile failed");
    h.run().expect("run failed");
    assert_eq!(*h.floats.borrow(), vec![3.5]);
}

#[test]
fn immediate_source_float_destination() {
    let mut h = harness("static f floats 1.25\nproc init\nadd f 2\nmove printfloat f\nret\n")
        .expect("compile failed");
    h.run().expect("run failed");
    assert_eq!(*h.floats.borrow(), vec![3.25]);
}

#[test]
fn wraps_on_overflow() {
    assert_eq!(
        run_ints("static a 2147483647\nproc init\nadd a 1\nmove printint a\nret\n"),
        vec![i32::min_value()]
    );
}
