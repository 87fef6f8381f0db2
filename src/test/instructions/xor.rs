use crate::test::run_ints;

#[test]
fn int_int() {
    assert_eq!(
        run_ints("static a 12\nproc init\nxor a 10\nmove printint a\nret\n"),
        vec![6]
    );
}

#[test]
fn clears_to_zero() {
    assert_eq!(
        run_ints("static a 77\nproc init\nxor a a\nmove printint a\nret\n"),
        vec![0]
    );
}
