use rust_ndarray_lib::{ops, CpuTensor, DataType, Error, ErrorKind, Shape, TensorList};

fn counting(shape: &[usize]) -> CpuTensor {
    let size = shape.iter().product::<usize>() as f64;
    CpuTensor::arange(0.0, size, 1.0, DataType::Float32)
        .and_then(|t| t.reshape(shape))
        .unwrap()
}

#[test]
fn test_reshape_and_flatten() -> Result<(), Error> {
    let a = counting(&[2, 3]);
    let b = a.reshape(&[3, 2])?;
    assert_eq!(b.shape(), Shape::from([3, 2]));
    assert_eq!(b.to_vec::<f32>()?, a.to_vec::<f32>()?);
    assert_eq!(a.flatten()?.shape(), Shape::from([6]));
    assert_eq!(a.reshape(&[4]).unwrap_err().kind(), ErrorKind::ShapeMismatch);
    Ok(())
}

#[test]
fn test_expand_and_squeeze() -> Result<(), Error> {
    let a = counting(&[2, 3]);
    assert_eq!(a.expand_dims(0)?.shape(), Shape::from([1, 2, 3]));
    assert_eq!(a.expand_dims(-1)?.shape(), Shape::from([2, 3, 1]));
    assert_eq!(a.expand_dims(1)?.shape(), Shape::from([2, 1, 3]));
    assert!(a.expand_dims(4).is_err());

    let padded = a.reshape(&[1, 2, 1, 3])?;
    assert_eq!(padded.squeeze(None)?.shape(), Shape::from([2, 3]));
    assert_eq!(padded.squeeze(Some(2))?.shape(), Shape::from([1, 2, 3]));
    assert_eq!(padded.squeeze(Some(1)).unwrap_err().kind(), ErrorKind::ShapeMismatch);
    Ok(())
}

#[test]
fn test_transpose_and_swap() -> Result<(), Error> {
    let a = counting(&[2, 3]);
    let t = a.transpose()?;
    assert_eq!(t.shape(), Shape::from([3, 2]));
    assert_eq!(t.to_vec::<f32>()?, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);

    let cube = counting(&[2, 3, 4]);
    assert_eq!(cube.transpose_axes(&[1, 0, 2])?.shape(), Shape::from([3, 2, 4]));
    assert_eq!(cube.swap_axes(0, -1)?.shape(), Shape::from([4, 3, 2]));
    assert!(cube.transpose_axes(&[0, 0, 1]).is_err());
    Ok(())
}

#[test]
fn test_broadcast_to_shape() -> Result<(), Error> {
    let row = CpuTensor::from_vec(vec![1i32, 2, 3], &[3])?;
    let stretched = row.broadcast(&[2, 3])?;
    assert_eq!(stretched.to_vec::<i32>()?, vec![1, 2, 3, 1, 2, 3]);
    assert!(row.broadcast(&[3, 2]).is_err());
    Ok(())
}

#[test]
fn test_concat_split_round_trip() -> Result<(), Error> {
    let a = counting(&[2, 6]);
    let parts = a.split_equal(1, 3)?;
    assert_eq!(parts.len(), 3);
    for part in &parts {
        assert_eq!(part.shape(), Shape::from([2, 2]));
    }
    assert_eq!(parts[1].to_vec::<f32>()?, vec![2.0, 3.0, 8.0, 9.0]);

    let joined = parts.concat(1)?;
    assert!(joined.content_equals(&a)?);
    assert_eq!(joined.shape(), a.shape());

    let uneven = a.split_at(-1, &[1, 4])?;
    let sizes: Vec<usize> = uneven.shapes().iter().map(|s| s[1]).collect();
    assert_eq!(sizes, vec![1, 3, 2]);
    assert!(ops::concat(&uneven.iter().collect::<Vec<_>>(), 1)?.content_equals(&a)?);

    assert!(a.split_equal(1, 4).is_err());
    assert!(a.split_at(1, &[4, 2]).is_err());
    Ok(())
}

#[test]
fn test_concat_validation() -> Result<(), Error> {
    let a = counting(&[2, 2]);
    let b = counting(&[3, 2]);
    let rows = ops::concat(&[&a, &b], 0)?;
    assert_eq!(rows.shape(), Shape::from([5, 2]));
    assert_eq!(ops::concat(&[&a, &b], 1).unwrap_err().kind(), ErrorKind::ShapeMismatch);
    assert!(ops::concat::<rust_ndarray_lib::CpuBackend>(&[], 0).is_err());

    let mixed = ops::concat(&[&a, &CpuTensor::ones(&[1, 2], DataType::Int32)?], 0)?;
    assert_eq!(mixed.dtype(), DataType::Float32);
    Ok(())
}

#[test]
fn test_stack_unstack_round_trip() -> Result<(), Error> {
    let a = counting(&[2, 3]);
    let b = a.add_scalar(10.0)?;
    let stacked = ops::stack(&[&a, &b], 0)?;
    assert_eq!(stacked.shape(), Shape::from([2, 2, 3]));

    let last = ops::stack(&[&a, &b], -1)?;
    assert_eq!(last.shape(), Shape::from([2, 3, 2]));
    assert_eq!(last.get_f32(&[0, 1, 1])?, 11.0);

    let pieces = stacked.unstack(0)?;
    assert_eq!(pieces.len(), 2);
    assert!(pieces[0].content_equals(&a)?);
    assert!(pieces[1].content_equals(&b)?);

    let list: TensorList<_> = vec![a.clone(), b.clone()].into();
    assert!(list.stack(0)?.content_equals(&stacked)?);
    assert!(ops::stack(&[&a, &counting(&[3, 2])], 0).is_err());
    Ok(())
}

#[test]
fn test_slice_axis() -> Result<(), Error> {
    let a = counting(&[3, 4]);
    let middle = a.slice_axis(1, 1, 3)?;
    assert_eq!(middle.shape(), Shape::from([3, 2]));
    assert_eq!(middle.to_vec::<f32>()?, vec![1.0, 2.0, 5.0, 6.0, 9.0, 10.0]);
    Ok(())
}

#[test]
fn test_tile_and_repeat() -> Result<(), Error> {
    let a = CpuTensor::from_vec(vec![1i32, 2, 3, 4], &[2, 2])?;

    let tiled = a.tile(2)?;
    assert_eq!(tiled.shape(), Shape::from([4, 4]));
    assert_eq!(tiled.get_expr("0")?.to_vec::<i32>()?, vec![1, 2, 1, 2]);
    assert_eq!(tiled.get_expr(":, 0")?.to_vec::<i32>()?, vec![1, 3, 1, 3]);

    let repeated = a.repeat(2)?;
    assert_eq!(repeated.get_expr("0")?.to_vec::<i32>()?, vec![1, 1, 2, 2]);
    assert_eq!(repeated.get_expr(":, 0")?.to_vec::<i32>()?, vec![1, 1, 3, 3]);

    assert_eq!(a.tile_axis(0, 3)?.shape(), Shape::from([6, 2]));
    assert_eq!(a.repeat_axis(-1, 3)?.get_expr("1")?.to_vec::<i32>()?, vec![3, 3, 3, 4, 4, 4]);

    // Longer repetition lists prepend axes
    assert_eq!(a.tile_dims(&[2, 1, 1])?.shape(), Shape::from([2, 2, 2]));

    let grown = a.tile_to(&[4, 6])?;
    assert_eq!(grown.shape(), Shape::from([4, 6]));
    assert_eq!(a.repeat_to(&[2, 4])?.get_expr("0")?.to_vec::<i32>()?, vec![1, 1, 2, 2]);
    assert_eq!(a.tile_to(&[3, 2]).unwrap_err().kind(), ErrorKind::ShapeMismatch);
    Ok(())
}

#[test]
fn test_clip() -> Result<(), Error> {
    let a = CpuTensor::from_vec(vec![-5i32, 0, 5], &[3])?;
    assert_eq!(a.clip(-1.0, 2.0)?.to_vec::<i32>()?, vec![-1, 0, 2]);
    assert!(a.clip(2.0, -1.0).is_err());
    assert!(a.clip(f64::NAN, 1.0).is_err());
    Ok(())
}

#[test]
fn test_structural_ops_copy() -> Result<(), Error> {
    let a = counting(&[2, 2]);
    let b = a.reshape(&[4])?;
    b.set_scalari(&rust_ndarray_lib::NdIndex::from_points(&[0]), 99.0)?;
    assert_eq!(a.get_f32(&[0, 0])?, 0.0);
    Ok(())
}
