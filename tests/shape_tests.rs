use rust_ndarray_lib::shape::broadcast_shapes;
use rust_ndarray_lib::{CpuTensor, DataType, Error, ErrorKind, Shape};

#[test]
fn test_shape_basics() {
    let shape = Shape::from([2, 3, 4]);
    assert_eq!(shape.rank(), 3);
    assert_eq!(shape.size(), 24);
    assert_eq!(shape.strides(), vec![12, 4, 1]);
    assert_eq!(shape[1], 3);
    assert_eq!(shape.dim(-1).unwrap(), 4);
    assert!(shape.dim(3).is_err());

    let scalar = Shape::scalar();
    assert!(scalar.is_scalar());
    assert_eq!(scalar.size(), 1);
    assert_eq!(Shape::from([0, 5]).size(), 0);
}

#[test]
fn test_normalize_axes() {
    let shape = Shape::from([2, 3, 4]);
    assert_eq!(shape.normalize_axis(-1).unwrap(), 2);
    assert_eq!(shape.normalize_axes(&[-1, 0]).unwrap(), vec![0, 2]);
    // An empty list means every axis
    assert_eq!(shape.normalize_axes(&[]).unwrap(), vec![0, 1, 2]);

    let err = shape.normalize_axis(3).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidIndex);
    assert!(shape.normalize_axis(-4).is_err());
}

#[test]
fn test_broadcast_rule() {
    assert_eq!(broadcast_shapes(&[2, 1, 3], &[4, 1]).unwrap(), vec![2, 4, 3]);
    assert_eq!(broadcast_shapes(&[], &[3, 2]).unwrap(), vec![3, 2]);
    assert_eq!(broadcast_shapes(&[5, 0], &[1]).unwrap(), vec![5, 0]);

    let err = broadcast_shapes(&[2, 3], &[4, 3]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShapeMismatch);

    let a = Shape::from([3, 1]);
    assert_eq!(a.broadcast(&Shape::from([1, 4])).unwrap(), Shape::from([3, 4]));
    assert!(a.broadcasts_to(&Shape::from([2, 3, 5])));
    assert!(!Shape::from([3, 2]).broadcasts_to(&Shape::from([3, 1])));
}

#[test]
fn test_reduce_shape() {
    let shape = Shape::from([2, 3, 4]);
    assert_eq!(shape.reduce(&[1], false), Shape::from([2, 4]));
    assert_eq!(shape.reduce(&[0, 2], true), Shape::from([1, 3, 1]));
    assert_eq!(shape.reduce(&[0, 1, 2], false), Shape::scalar());
}

#[test]
fn test_offsets_round_trip() {
    let shape = Shape::from([2, 3, 4]);
    for flat in 0..shape.size() {
        let index = shape.unravel(flat);
        assert_eq!(shape.offset(&index), flat);
    }
}

#[test]
fn test_array_ops_report_broadcast_failures() -> Result<(), Error> {
    let a = CpuTensor::zeros(&[2, 3], DataType::Float32)?;
    let b = CpuTensor::zeros(&[4, 3], DataType::Float32)?;
    let err = a.add(&b).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShapeMismatch);

    let row = CpuTensor::ones(&[3], DataType::Float32)?;
    let sum = a.add(&row)?;
    assert_eq!(sum.shape(), Shape::from([2, 3]));
    assert!(sum.content_equals_scalar(1.0)?);

    for t in [a, b, row, sum] {
        t.close()?;
    }
    Ok(())
}
