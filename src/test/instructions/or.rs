use crate::test::run_ints;

#[test]
fn int_int() {
    assert_eq!(
        run_ints("static a 12\nproc init\nor a 10\nmove printint a\nret\n"),
        vec![14]
    );
}
