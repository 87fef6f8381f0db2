use crate::test::run_ints;

#[test]
fn basic() {
    assert_eq!(
        run_ints("static a 48\nproc init\nshr a 4\nmove printint a\nret\n"),
        vec![3]
    );
}

#[test]
fn arithmetic_on_negative() {
    assert_eq!(
        run_ints("static a -8\nproc init\nshr a 1\nmove printint a\nret\n"),
        vec![-4]
    );
}
