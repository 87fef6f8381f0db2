use crate::test::run_ints;

#[test]
fn taken_on_positive() {
    assert_eq!(
        run_ints(
            "static r 0\nproc init\ncmp 4 3\njumpg skip\nmove r 1\nlabel skip\n\
             move printint r\nret\n"
        ),
        vec![0]
    );
}

#[test]
fn falls_through_on_negative() {
    assert_eq!(
        run_ints(
            "static r 0\nproc init\ncmp 2 3\njumpg skip\nmove r 1\nlabel skip\n\
             move printint r\nret\n"
        ),
        vec![1]
    );
}
