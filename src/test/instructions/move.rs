use crate::test::{harness, run_ints};

#[test]
fn immediate_to_int() {
    assert_eq!(
        run_ints("static a 0\nproc init\nmove a 42\nmove printint a\nret\n"),
        vec![42]
    );
}

#[test]
fn float_to_int_truncates() {
    assert_eq!(
        run_ints("static i 0\nstatic f floats 3.5\nproc init\nmove i f\nmove printint i\nret\n"),
        vec![3]
    );
}

#[test]
fn int_to_float_widens() {
    let mut h = harness("static f floats 0.0\nproc init\nmove f 7\nmove printfloat f\nret\n")
        .expect("compile failed");
    h.run().expect("run failed");
    assert_eq!(*h.floats.borrow(), vec![7.0]);
}

#[test]
fn array_immediate_index() {
    assert_eq!(
        run_ints("static arr ints 10 20 30\nproc init\nmove printint arr:2\nret\n"),
        vec![30]
    );
}

#[test]
fn array_variable_index() {
    assert_eq!(
        run_ints(
            "static arr ints 10 20 30\nstatic idx 1\nproc init\n\
             move arr:idx 99\nmove printint arr:1\nret\n"
        ),
        vec![99]
    );
}

#[test]
fn length_of_reads_count() {
    assert_eq!(
        run_ints("static arr ints 10 20 30\nproc init\nmove printint arr:\nret\n"),
        vec![3]
    );
}

#[test]
fn byte_elements() {
    let mut h = harness("static s string \"Hi\"\nproc init\nmove out s\nmove out s:1\nret\n")
        .expect("compile failed");
    h.run().expect("run failed");
    assert_eq!(*h.bytes.borrow(), b"Hi".to_vec());
}

#[test]
fn immediate_index_out_of_bounds_rejected() {
    assert!(harness("static arr ints 2\nproc init\nmove printint arr:2\nret\n").is_err());
}

#[test]
fn immediate_destination_rejected() {
    assert!(harness("static a 0\nproc init\nmove 5 a\nret\n").is_err());
}

#[test]
fn length_destination_rejected() {
    assert!(harness("static arr ints 2\nproc init\nmove arr: 5\nret\n").is_err());
}
