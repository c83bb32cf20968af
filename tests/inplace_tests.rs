use rust_ndarray_lib::{autograd, CpuTensor, DataType, Device, Error, ErrorKind, SparseFormat};
use serial_test::serial;

#[test]
fn test_inplace_returns_receiver() -> Result<(), Error> {
    let a = CpuTensor::from_vec(vec![1.0f32, 2.0, 3.0], &[3])?;
    let alias = a.clone();
    let b = CpuTensor::from_vec(vec![10.0f32, 20.0, 30.0], &[3])?;

    let returned = a.addi(&b)?;
    assert_eq!(returned, a);
    assert_eq!(alias.to_vec::<f32>()?, vec![11.0, 22.0, 33.0]);
    // The operand is untouched
    assert_eq!(b.to_vec::<f32>()?, vec![10.0, 20.0, 30.0]);

    a.mul_scalari(2.0)?.sub_scalari(2.0)?;
    assert_eq!(a.to_vec::<f32>()?, vec![20.0, 42.0, 64.0]);
    Ok(())
}

#[test]
fn test_copy_form_leaves_receiver() -> Result<(), Error> {
    let a = CpuTensor::from_vec(vec![1.0f64, 2.0], &[2])?;
    let b = a.add_scalar(1.0)?;
    assert_ne!(a.id(), b.id());
    assert_eq!(a.to_vec::<f64>()?, vec![1.0, 2.0]);
    assert_eq!(b.to_vec::<f64>()?, vec![2.0, 3.0]);
    Ok(())
}

#[test]
fn test_self_aliasing_operand() -> Result<(), Error> {
    let a = CpuTensor::from_vec(vec![1i64, 2, 3], &[3])?;
    a.addi(&a)?;
    assert_eq!(a.to_vec::<i64>()?, vec![2, 4, 6]);
    a.muli(&a.clone())?;
    assert_eq!(a.to_vec::<i64>()?, vec![4, 16, 36]);
    Ok(())
}

#[test]
fn test_inplace_broadcasts_operand() -> Result<(), Error> {
    let a = CpuTensor::zeros(&[2, 3], DataType::Float32)?;
    let row = CpuTensor::from_vec(vec![1.0f32, 2.0, 3.0], &[3])?;
    a.addi(&row)?;
    assert_eq!(a.to_vec::<f32>()?, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    Ok(())
}

#[test]
fn test_inplace_rejects_shape_change() -> Result<(), Error> {
    let a = CpuTensor::zeros(&[3], DataType::Float32)?;
    let b = CpuTensor::ones(&[2, 3], DataType::Float32)?;
    let err = a.addi(&b).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    assert_eq!(a.to_vec::<f32>()?, vec![0.0; 3]);
    Ok(())
}

#[test]
fn test_inplace_rejects_type_change() -> Result<(), Error> {
    let a = CpuTensor::from_vec(vec![1i32, 2], &[2])?;
    let b = CpuTensor::from_vec(vec![0.5f64, 0.5], &[2])?;
    assert_eq!(a.addi(&b).unwrap_err().kind(), ErrorKind::InvalidConversion);
    assert_eq!(a.sqrti().unwrap_err().kind(), ErrorKind::InvalidConversion);
    assert_eq!(a.cumsumi(0).unwrap_err().kind(), ErrorKind::InvalidConversion);

    // Copy forms promote freely
    assert_eq!(a.add(&b)?.dtype(), DataType::Float64);
    assert_eq!(a.sqrt()?.dtype(), DataType::Float32);
    Ok(())
}

#[test]
fn test_inplace_on_sparse_receiver_fails() -> Result<(), Error> {
    let dense = CpuTensor::from_vec(vec![0.0f32, 1.0, 0.0, 2.0], &[2, 2])?;
    let csr = dense.to_sparse(SparseFormat::Csr)?;
    let err = csr.add_scalari(1.0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert!(csr.add_scalar(1.0).is_ok());
    Ok(())
}

#[test]
fn test_other_inplace_forms() -> Result<(), Error> {
    let a = CpuTensor::from_vec(vec![-2.0f64, 0.5, 4.0], &[3])?;
    a.clipi(-1.0, 1.0)?;
    assert_eq!(a.to_vec::<f64>()?, vec![-1.0, 0.5, 1.0]);
    a.absi()?;
    assert_eq!(a.to_vec::<f64>()?, vec![1.0, 0.5, 1.0]);
    a.cumsumi(0)?;
    assert_eq!(a.to_vec::<f64>()?, vec![1.0, 1.5, 2.5]);
    a.negi()?;
    assert_eq!(a.to_vec::<f64>()?, vec![-1.0, -1.5, -2.5]);
    assert!(a.clipi(1.0, -1.0).is_err());
    Ok(())
}

#[test]
fn test_set_data_and_copy_to() -> Result<(), Error> {
    let a = CpuTensor::zeros(&[2, 2], DataType::Int32)?;
    a.set_data(&[1.9f64, -2.7, 3.0, 4.0])?;
    assert_eq!(a.to_vec::<i32>()?, vec![1, -2, 3, 4]);
    assert!(a.set_data(&[1.0f32]).is_err());

    let target = CpuTensor::ones(&[2, 2], DataType::Float32)?;
    a.copy_to(&target)?;
    assert_eq!(target.dtype(), DataType::Float32);
    assert_eq!(target.to_vec::<f32>()?, vec![1.0, -2.0, 3.0, 4.0]);

    let wrong = CpuTensor::ones(&[4], DataType::Float32)?;
    assert_eq!(a.copy_to(&wrong).unwrap_err().kind(), ErrorKind::ShapeMismatch);
    Ok(())
}

#[test]
fn test_conversions_respect_copy_flag() -> Result<(), Error> {
    let a = CpuTensor::from_vec(vec![1.5f32, 2.5], &[2])?;
    let same = a.as_type(DataType::Float32, false)?;
    assert_eq!(same, a);
    let copied = a.as_type(DataType::Float32, true)?;
    assert_ne!(copied, a);
    let ints = a.as_type(DataType::Int32, false)?;
    assert_eq!(ints.to_vec::<i32>()?, vec![1, 2]);

    let moved = a.as_in_device(Device::Gpu(1), true)?;
    assert_eq!(moved.device(), Device::Gpu(1));
    assert_eq!(a.device(), Device::Cpu);
    let rebound = a.as_in_device(Device::Gpu(0), false)?;
    assert_eq!(rebound, a);
    assert_eq!(a.device(), Device::Gpu(0));
    assert_eq!(a.add_scalar(1.0)?.device(), Device::Gpu(0));
    Ok(())
}

#[test]
#[serial]
fn test_inplace_on_recorded_array_fails() -> Result<(), Error> {
    let x = CpuTensor::from_vec(vec![1.0f64, 2.0], &[2])?;
    x.attach_grad()?;
    let _recording = autograd::record();
    let y = x.mul_scalar(3.0)?;
    assert_eq!(x.add_scalari(1.0).unwrap_err().kind(), ErrorKind::InvalidOperation);
    assert_eq!(y.add_scalari(1.0).unwrap_err().kind(), ErrorKind::InvalidOperation);

    // Arrays outside the graph stay writable
    let free = CpuTensor::zeros(&[2], DataType::Float64)?;
    free.add_scalari(1.0)?;
    assert_eq!(free.to_vec::<f64>()?, vec![1.0, 1.0]);
    Ok(())
}

#[test]
fn test_int64_overflow_leaves_receiver() -> Result<(), Error> {
    let limit = rust_ndarray_lib::MAX_EXACT_INT64;
    let a = CpuTensor::from_vec(vec![1i64, limit], &[2])?;
    let ones = CpuTensor::from_vec(vec![1i64, 1], &[2])?;
    assert_eq!(a.addi(&ones).unwrap_err().kind(), ErrorKind::InvalidConversion);
    assert_eq!(a.to_vec::<i64>()?, vec![1, limit]);

    assert!(a.set_data(&[limit + 1, 0]).is_err());
    assert!(a.set_scalari(&rust_ndarray_lib::NdIndex::from_points(&[0]), 1e18).is_err());
    assert_eq!(a.to_vec::<i64>()?, vec![1, limit]);
    Ok(())
}
