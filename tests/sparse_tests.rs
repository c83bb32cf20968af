use rust_ndarray_lib::{CpuTensor, DataType, Error, NdIndex, SparseFormat};

fn sample() -> CpuTensor {
    CpuTensor::from_vec(vec![0.0f32, 0.0, 0.0, 1.0, 0.0, 2.0], &[2, 3]).unwrap()
}

#[test]
fn test_to_sparse_formats() -> Result<(), Error> {
    let dense = sample();
    assert_eq!(dense.format(), SparseFormat::Dense);
    assert!(!dense.is_sparse());

    let csr = dense.to_sparse(SparseFormat::Csr)?;
    assert_eq!(csr.format(), SparseFormat::Csr);
    assert!(csr.is_sparse());
    assert_eq!(csr.shape(), dense.shape());
    assert_eq!(csr.dtype(), DataType::Float32);
    assert_eq!(csr.to_vec::<f32>()?, dense.to_vec::<f32>()?);

    let rows = dense.to_sparse(SparseFormat::RowSparse)?;
    assert_eq!(rows.format(), SparseFormat::RowSparse);
    assert_eq!(rows.to_vec::<f32>()?, dense.to_vec::<f32>()?);

    // Conversion always produces a new array
    let again = csr.to_sparse(SparseFormat::Csr)?;
    assert_ne!(again.id(), csr.id());
    Ok(())
}

#[test]
fn test_nonzero_and_byte_len() -> Result<(), Error> {
    let dense = sample();
    assert_eq!(dense.nonzero()?, 2);
    assert_eq!(dense.byte_len()?, 6 * 4);

    let rows = dense.to_sparse(SparseFormat::RowSparse)?;
    assert_eq!(rows.nonzero()?, 2);
    // One stored row of three floats plus its row index
    assert_eq!(rows.byte_len()?, 3 * 4 + 8);

    let csr = dense.to_sparse(SparseFormat::Csr)?;
    assert_eq!(csr.nonzero()?, 2);
    assert!(csr.byte_len()? > 0);
    Ok(())
}

#[test]
fn test_to_dense_round_trip() -> Result<(), Error> {
    let dense = sample();
    let copy = dense.to_dense()?;
    assert_ne!(copy.id(), dense.id());
    assert!(copy.content_equals(&dense)?);

    for format in [SparseFormat::Csr, SparseFormat::RowSparse] {
        let back = dense.to_sparse(format)?.to_dense()?;
        assert_eq!(back.format(), SparseFormat::Dense);
        assert!(back.content_equals(&dense)?);
    }
    Ok(())
}

#[test]
fn test_csr_requires_matrix() -> Result<(), Error> {
    let cube = CpuTensor::zeros(&[2, 2, 2], DataType::Float64)?;
    assert!(cube.to_sparse(SparseFormat::Csr).is_err());
    let rows = cube.to_sparse(SparseFormat::RowSparse)?;
    assert_eq!(rows.nonzero()?, 0);
    assert_eq!(rows.shape().dims(), &[2, 2, 2]);
    Ok(())
}

#[test]
fn test_ops_on_sparse_return_dense() -> Result<(), Error> {
    let csr = sample().to_sparse(SparseFormat::Csr)?;
    let doubled = csr.mul_scalar(2.0)?;
    assert_eq!(doubled.format(), SparseFormat::Dense);
    assert_eq!(doubled.to_vec::<f32>()?, vec![0.0, 0.0, 0.0, 2.0, 0.0, 4.0]);

    let rows = sample().to_sparse(SparseFormat::RowSparse)?;
    let total = rows.add(&csr)?;
    assert_eq!(total.format(), SparseFormat::Dense);
    assert_eq!(total.sum_all()?, 6.0);
    assert_eq!(rows.sum(&[1], false)?.to_vec::<f32>()?, vec![0.0, 3.0]);
    Ok(())
}

#[test]
fn test_set_keeps_format() -> Result<(), Error> {
    let csr = sample().to_sparse(SparseFormat::Csr)?;
    let updated = csr.set_scalar(&NdIndex::from_points(&[0, 1]), 7.0)?;
    assert_eq!(updated.format(), SparseFormat::Csr);
    assert_eq!(updated.nonzero()?, 3);
    assert_eq!(updated.get_f32(&[0, 1])?, 7.0);
    // Receiver unchanged
    assert_eq!(csr.nonzero()?, 2);
    Ok(())
}

#[test]
fn test_like_keeps_format() -> Result<(), Error> {
    let rows = sample().to_sparse(SparseFormat::RowSparse)?;
    let zeros = rows.zeros_like()?;
    assert_eq!(zeros.format(), SparseFormat::RowSparse);
    assert_eq!(zeros.nonzero()?, 0);

    let ones = rows.ones_like()?;
    assert_eq!(ones.format(), SparseFormat::RowSparse);
    assert_eq!(ones.nonzero()?, 6);

    let blank = rows.like()?;
    assert_eq!(blank.shape(), rows.shape());
    assert_eq!(blank.dtype(), rows.dtype());
    assert_eq!(blank.format(), SparseFormat::RowSparse);

    let copy = rows.dup()?;
    assert_eq!(copy.format(), SparseFormat::RowSparse);
    assert!(copy.content_equals(&rows)?);
    Ok(())
}

#[test]
fn test_boolean_sparse_counts() -> Result<(), Error> {
    let flags = CpuTensor::from_vec(vec![true, false, false, true], &[2, 2])?;
    let csr = flags.to_sparse(SparseFormat::Csr)?;
    assert_eq!(csr.dtype(), DataType::Boolean);
    assert_eq!(csr.nonzero()?, 2);
    assert_eq!(csr.to_vec::<bool>()?, vec![true, false, false, true]);
    Ok(())
}
