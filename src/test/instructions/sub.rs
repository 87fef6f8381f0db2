use crate::test::run_ints;

#[test]
fn int_int() {
    assert_eq!(
        run_ints("static a 5\nproc init\nsub a 8\nmove printint a\nret\n"),
        vec![-3]
    );
}

#[test]
fn float_source_truncates_into_int() {
    assert_eq!(
        run_ints(
            "static i 10\nstatic f floats 0.5\nproc init\n\
             sub i f\nmove printint i\nret\n"
        ),
        vec![9]
    );
}
