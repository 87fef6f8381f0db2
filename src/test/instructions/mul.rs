use crate::test::{harness, run_ints};

#[test]
fn int_int() {
    assert_eq!(
        run_ints("static a 6\nproc init\nmul a 7\nmove printint a\nret\n"),
        vec![42]
    );
}

#[test]
fn float_float() {
    let mut h = harness(
        "static a floats 1.5\nstatic b floats 4.0\nproc init\n\
         mul a b\nmove printfloat a\nret\n",
    )
    .expect("compile failed");
    h.run().expect("run failed");
    assert_eq!(*h.floats.borrow(), vec![6.0]);
}
