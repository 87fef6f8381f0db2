use crate::test::run_ints;

#[test]
fn does_not_write_destination() {
    assert_eq!(
        run_ints(
            "static a 5\nproc init\ncmp a 3\nmove printint a\nret\n"
        ),
        vec![5]
    );
}

#[test]
fn immediate_operands() {
    // 5 - 3 > 0, so the jump is taken
    assert_eq!(
        run_ints(
            "static r 0\nproc init\ncmp 5 3\njumpg yes\nmove r 1\nlabel yes\n\
             move printint r\nret\n"
        ),
        vec![0]
    );
}

#[test]
fn float_result_drives_jump() {
    assert_eq!(
        run_ints(
            "static a floats 1.5\nstatic b floats 2.5\nstatic r 0\nproc init\n\
             cmp a b\njumpl neg\nmove r 1\nlabel neg\nmove printint r\nret\n"
        ),
        vec![0]
    );
}

#[test]
fn length_of_operand() {
    // 3 - 3 == 0
    assert_eq!(
        run_ints(
            "static arr ints 3\nstatic r 1\nproc init\ncmp arr: 3\njumpz zero\n\
             move r 0\nlabel zero\nmove printint r\nret\n"
        ),
        vec![1]
    );
}
