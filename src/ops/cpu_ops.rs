//! CPU kernels over [`Array`], implemented with `ndarray`.
//!
//! Sparse inputs are densified on entry; every kernel returns dense storage.

use crate::array::Array;
use crate::backend::{ArgReduceOp, BinaryOp, CompareOp, ReduceOp, UnaryOp};
use crate::error::Error;
use crate::shape::broadcast_shapes;
use crate::types::DataType;
use ndarray::{ArrayD, Axis, IxDyn, Slice, Zip};

fn bool_value(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Applies `f` pairwise after broadcasting both operands.
fn zip_broadcast<F>(op: &str, a: &ArrayD<f64>, b: &ArrayD<f64>, f: F) -> Result<ArrayD<f64>, Error>
where
    F: Fn(f64, f64) -> f64,
{
    let shape = broadcast_shapes(a.shape(), b.shape()).map_err(|_| Error::incompatible(op, a.shape(), b.shape()))?;
    let a_view = a
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| Error::incompatible(op, a.shape(), &shape))?;
    let b_view = b
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| Error::incompatible(op, b.shape(), &shape))?;
    Ok(Zip::from(&a_view).and(&b_view).map_collect(|&x, &y| f(x, y)))
}

/// Applies `f` into `a`, broadcasting `b` to `a`'s shape.
fn zip_into<F>(op: &str, a: &mut ArrayD<f64>, b: &ArrayD<f64>, f: F) -> Result<(), Error>
where
    F: Fn(f64, f64) -> f64,
{
    let result_shape =
        broadcast_shapes(a.shape(), b.shape()).map_err(|_| Error::incompatible(op, a.shape(), b.shape()))?;
    if result_shape != a.shape() {
        return Err(Error::ShapeMismatch {
            expected: a.shape().to_vec(),
            actual: result_shape,
        });
    }
    let target = a.raw_dim();
    let b_view = b
        .broadcast(target)
        .ok_or_else(|| Error::incompatible(op, b.shape(), a.shape()))?;
    Zip::from(a).and(&b_view).for_each(|x, &y| *x = f(*x, y));
    Ok(())
}

pub fn binary(op: BinaryOp, a: &Array, b: &Array) -> Result<Array, Error> {
    let dtype = a.dtype().promote(b.dtype());
    let out = zip_broadcast(&op.to_string(), &a.dense(), &b.dense(), |x, y| op.apply(x, y))?;
    Ok(Array::new(out, dtype).with_device(a.device()))
}

pub fn binary_inplace(op: BinaryOp, a: &mut Array, b: &Array) -> Result<(), Error> {
    let dtype = a.dtype();
    let promoted = dtype.promote(b.dtype());
    if promoted != dtype {
        return Err(Error::InvalidConversion(format!(
            "in-place {} would change {} to {}",
            op, dtype, promoted
        )));
    }
    let b_dense = b.dense().into_owned();
    let data = a.dense_mut()?;
    zip_into(&op.to_string(), data, &b_dense, |x, y| dtype.cast_value(op.apply(x, y)))
}

pub fn binary_scalar(op: BinaryOp, a: &Array, scalar: f64) -> Result<Array, Error> {
    let out = a.dense().mapv(|x| op.apply(x, scalar));
    Ok(Array::new(out, a.dtype()).with_device(a.device()))
}

pub fn binary_scalar_inplace(op: BinaryOp, a: &mut Array, scalar: f64) -> Result<(), Error> {
    let dtype = a.dtype();
    a.dense_mut()?
        .mapv_inplace(|x| dtype.cast_value(op.apply(x, scalar)));
    Ok(())
}

pub fn compare(op: CompareOp, a: &Array, b: &Array) -> Result<Array, Error> {
    let out = zip_broadcast(&format!("{:?}", op), &a.dense(), &b.dense(), |x, y| {
        bool_value(op.apply(x, y))
    })?;
    Ok(Array::new(out, DataType::Boolean).with_device(a.device()))
}

pub fn compare_scalar(op: CompareOp, a: &Array, scalar: f64) -> Result<Array, Error> {
    let out = a.dense().mapv(|x| bool_value(op.apply(x, scalar)));
    Ok(Array::new(out, DataType::Boolean).with_device(a.device()))
}

pub fn unary(op: UnaryOp, a: &Array) -> Result<Array, Error> {
    let out = a.dense().mapv(|x| op.apply(x));
    Ok(Array::new(out, op.result_dtype(a.dtype())).with_device(a.device()))
}

pub fn unary_inplace(op: UnaryOp, a: &mut Array) -> Result<(), Error> {
    let dtype = a.dtype();
    let result = op.result_dtype(dtype);
    if result != dtype {
        return Err(Error::InvalidConversion(format!(
            "in-place {:?} would change {} to {}",
            op, dtype, result
        )));
    }
    a.dense_mut()?.mapv_inplace(|x| dtype.cast_value(op.apply(x)));
    Ok(())
}

pub fn map(a: &Array, f: &dyn Fn(f64) -> f64, dtype: DataType) -> Result<Array, Error> {
    let out = a.dense().mapv(f);
    Ok(Array::new(out, dtype).with_device(a.device()))
}

fn reduce_axis(op: ReduceOp, data: &ArrayD<f64>, axis: usize) -> Result<ArrayD<f64>, Error> {
    let ax = Axis(axis);
    if data.shape()[axis] == 0 && matches!(op, ReduceOp::Max | ReduceOp::Min | ReduceOp::AbsMax | ReduceOp::AbsMin) {
        return Err(Error::EmptyTensor);
    }
    Ok(match op {
        ReduceOp::Sum => data.sum_axis(ax),
        ReduceOp::Prod => data.map_axis(ax, |lane| lane.iter().product()),
        ReduceOp::Mean => {
            let n = data.shape()[axis] as f64;
            data.sum_axis(ax).mapv(|v| v / n)
        }
        ReduceOp::Max => data.map_axis(ax, |lane| lane.iter().fold(f64::NEG_INFINITY, |m, &x| m.max(x))),
        ReduceOp::Min => data.map_axis(ax, |lane| lane.iter().fold(f64::INFINITY, |m, &x| m.min(x))),
        ReduceOp::AbsMax => data.map_axis(ax, |lane| lane.iter().fold(0.0, |m: f64, &x| m.max(x.abs()))),
        ReduceOp::AbsMin => data.map_axis(ax, |lane| {
            lane.iter().fold(f64::INFINITY, |m: f64, &x| m.min(x.abs()))
        }),
    })
}

pub(crate) fn reduce_dense(
    op: ReduceOp,
    data: &ArrayD<f64>,
    axes: &[usize],
    keep_dims: bool,
) -> Result<ArrayD<f64>, Error> {
    let mut sorted = axes.to_vec();
    sorted.sort_unstable();
    for &axis in &sorted {
        check_axis(axis, data.ndim())?;
    }
    let mut out = data.clone();
    for &axis in sorted.iter().rev() {
        out = reduce_axis(op, &out, axis)?;
    }
    if keep_dims {
        for &axis in &sorted {
            out = out.insert_axis(Axis(axis));
        }
    }
    Ok(out)
}

pub fn reduce(op: ReduceOp, a: &Array, axes: &[usize], keep_dims: bool) -> Result<Array, Error> {
    let out = reduce_dense(op, &a.dense(), axes, keep_dims)?;
    Ok(Array::new(out, op.result_dtype(a.dtype())).with_device(a.device()))
}

fn arg_of<'a, I: Iterator<Item = &'a f64>>(op: ArgReduceOp, values: I) -> f64 {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.enumerate() {
        let better = match best {
            None => true,
            Some((_, b)) => match op {
                ArgReduceOp::ArgMax => v > b,
                ArgReduceOp::ArgMin => v < b,
            },
        };
        if better {
            best = Some((i, v));
        }
    }
    best.map_or(0.0, |(i, _)| i as f64)
}

pub fn arg_reduce(op: ArgReduceOp, a: &Array, axis: Option<usize>, keep_dims: bool) -> Result<Array, Error> {
    let data = a.dense();
    if data.is_empty() {
        return Err(Error::EmptyTensor);
    }
    let out = match axis {
        None => {
            let idx = arg_of(op, data.iter());
            let shape = if keep_dims { vec![1; data.ndim()] } else { vec![] };
            ArrayD::from_elem(IxDyn(&shape), idx)
        }
        Some(axis) => {
            if axis >= data.ndim() {
                return Err(Error::AxisOutOfRange {
                    axis: axis as isize,
                    rank: data.ndim(),
                });
            }
            let reduced = data.map_axis(Axis(axis), |lane| arg_of(op, lane.iter()));
            if keep_dims {
                reduced.insert_axis(Axis(axis))
            } else {
                reduced
            }
        }
    };
    Ok(Array::new(out, DataType::Int64).with_device(a.device()))
}

pub fn cumsum(a: &Array, axis: Option<usize>) -> Result<Array, Error> {
    let dtype = if a.dtype().is_floating() {
        a.dtype()
    } else {
        DataType::Int64
    };
    let mut data = match axis {
        None => {
            let flat: Vec<f64> = a.dense().iter().copied().collect();
            ArrayD::from_shape_vec(IxDyn(&[flat.len()]), flat).map_err(|e| Error::ShapeError(e.to_string()))?
        }
        Some(axis) => {
            if axis >= a.shape().len() {
                return Err(Error::AxisOutOfRange {
                    axis: axis as isize,
                    rank: a.shape().len(),
                });
            }
            a.dense().into_owned()
        }
    };
    data.accumulate_axis_inplace(Axis(axis.unwrap_or(0)), |&prev, curr| *curr += prev);
    Ok(Array::new(data, dtype).with_device(a.device()))
}

fn ordered(ascending: bool) -> impl Fn(&f64, &f64) -> std::cmp::Ordering {
    move |x: &f64, y: &f64| {
        if ascending {
            x.total_cmp(y)
        } else {
            y.total_cmp(x)
        }
    }
}

fn check_axis(axis: usize, rank: usize) -> Result<(), Error> {
    if axis >= rank {
        return Err(Error::AxisOutOfRange {
            axis: axis as isize,
            rank,
        });
    }
    Ok(())
}

pub fn sort(a: &Array, axis: usize, ascending: bool) -> Result<Array, Error> {
    check_axis(axis, a.shape().len())?;
    let mut data = a.dense().into_owned();
    let cmp = ordered(ascending);
    for mut lane in data.lanes_mut(Axis(axis)) {
        let mut values = lane.to_vec();
        values.sort_by(&cmp);
        for (dst, src) in lane.iter_mut().zip(values) {
            *dst = src;
        }
    }
    Ok(Array::new(data, a.dtype()).with_device(a.device()))
}

pub fn argsort(a: &Array, axis: usize, ascending: bool) -> Result<Array, Error> {
    check_axis(axis, a.shape().len())?;
    let mut data = a.dense().into_owned();
    let cmp = ordered(ascending);
    for mut lane in data.lanes_mut(Axis(axis)) {
        let values = lane.to_vec();
        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&i, &j| cmp(&values[i], &values[j]));
        for (dst, src) in lane.iter_mut().zip(order) {
            *dst = src as f64;
        }
    }
    Ok(Array::new(data, DataType::Int64).with_device(a.device()))
}

/// Moves `axes` to the end and flattens them: `(rest..., n)`.
fn collapse_trailing(data: &ArrayD<f64>, axes: &[usize]) -> Result<(Vec<usize>, ArrayD<f64>), Error> {
    let rank = data.ndim();
    let kept: Vec<usize> = (0..rank).filter(|i| !axes.contains(i)).collect();
    let mut perm = kept.clone();
    perm.extend_from_slice(axes);
    let permuted = data.view().permuted_axes(IxDyn(&perm));
    let kept_dims: Vec<usize> = kept.iter().map(|&i| data.shape()[i]).collect();
    let inner: usize = axes.iter().map(|&i| data.shape()[i]).product();
    let outer: usize = kept_dims.iter().product();
    let flat: Vec<f64> = permuted.iter().copied().collect();
    let grid = ArrayD::from_shape_vec(IxDyn(&[outer, inner]), flat).map_err(|e| Error::ShapeError(e.to_string()))?;
    Ok((kept_dims, grid))
}

fn percentile_of(sorted: &[f64], q: f64) -> f64 {
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

pub fn percentile(a: &Array, q: f64, axes: &[usize]) -> Result<Array, Error> {
    if !(0.0..=100.0).contains(&q) {
        return Err(Error::InvalidOperation(format!(
            "percentile {} is outside [0, 100]",
            q
        )));
    }
    let data = a.dense();
    for &axis in axes {
        check_axis(axis, data.ndim())?;
    }
    let (kept_dims, grid) = collapse_trailing(&data, axes)?;
    if grid.shape()[1] == 0 {
        return Err(Error::EmptyTensor);
    }
    let values: Vec<f64> = grid
        .outer_iter()
        .map(|row| {
            let mut sorted: Vec<f64> = row.iter().copied().collect();
            sorted.sort_by(f64::total_cmp);
            percentile_of(&sorted, q)
        })
        .collect();
    let out = ArrayD::from_shape_vec(IxDyn(&kept_dims), values).map_err(|e| Error::ShapeError(e.to_string()))?;
    let dtype = if a.dtype().is_floating() {
        a.dtype()
    } else {
        DataType::Float32
    };
    Ok(Array::new(out, dtype).with_device(a.device()))
}

pub fn softmax(a: &Array, axes: &[usize], temperature: f64) -> Result<Array, Error> {
    if temperature <= 0.0 {
        return Err(Error::InvalidOperation(format!(
            "softmax temperature must be positive, got {}",
            temperature
        )));
    }
    let data = a.dense();
    let max = reduce_dense(ReduceOp::Max, &data, axes, true)?;
    let exp = zip_broadcast("softmax", &data, &max, |x, m| ((x - m) / temperature).exp())?;
    let total = reduce_dense(ReduceOp::Sum, &exp, axes, true)?;
    let out = zip_broadcast("softmax", &exp, &total, |e, s| e / s)?;
    let dtype = if a.dtype().is_floating() {
        a.dtype()
    } else {
        DataType::Float32
    };
    Ok(Array::new(out, dtype).with_device(a.device()))
}

/// Matrix multiplication of two 2-D arrays.
pub fn matmul(a: &Array, b: &Array) -> Result<Array, Error> {
    let a_data = a.dense();
    let b_data = b.dense();

    let a_2d = a_data
        .view()
        .into_dimensionality::<ndarray::Ix2>()
        .map_err(|e| Error::ShapeError(format!("Input 'a' is not 2D: {}", e)))?;
    let b_2d = b_data
        .view()
        .into_dimensionality::<ndarray::Ix2>()
        .map_err(|e| Error::ShapeError(format!("Input 'b' is not 2D: {}", e)))?;

    // (m, k) x (k, n)
    if a_2d.shape()[1] != b_2d.shape()[0] {
        return Err(Error::IncompatibleShapes {
            op: "matmul".to_string(),
            shape_a: a_2d.shape().to_vec(),
            shape_b: b_2d.shape().to_vec(),
        });
    }

    let result_2d = a_2d.dot(&b_2d);
    let dtype = a.dtype().promote(b.dtype());
    Ok(Array::new(result_2d.into_dyn(), dtype).with_device(a.device()))
}

pub fn reshape(a: &Array, shape: &[usize]) -> Result<Array, Error> {
    let new_size: usize = shape.iter().product();
    if new_size != a.size() {
        return Err(Error::ShapeMismatch {
            expected: shape.to_vec(),
            actual: a.shape().to_vec(),
        });
    }
    let data = ArrayD::from_shape_vec(IxDyn(shape), a.to_vec()).map_err(|e| Error::ShapeError(e.to_string()))?;
    Ok(Array::new(data, a.dtype()).with_device(a.device()))
}

pub fn transpose(a: &Array, perm: &[usize]) -> Result<Array, Error> {
    crate::shape::validate_permutation(perm, a.shape().len())?;
    let data = a.dense().view().permuted_axes(IxDyn(perm)).to_owned();
    Ok(Array::new(data, a.dtype()).with_device(a.device()))
}

pub fn broadcast_to(a: &Array, shape: &[usize]) -> Result<Array, Error> {
    let data = a.dense();
    match data.broadcast(IxDyn(shape)) {
        Some(view) => Ok(Array::new(view.to_owned(), a.dtype()).with_device(a.device())),
        None => Err(Error::incompatible("broadcast", a.shape(), shape)),
    }
}

pub fn concat(inputs: &[&Array], axis: usize) -> Result<Array, Error> {
    let first = inputs
        .first()
        .ok_or_else(|| Error::InvalidOperation("concat requires at least one input".to_string()))?;
    let dtype = inputs.iter().fold(first.dtype(), |d, a| d.promote(a.dtype()));
    let dense: Vec<_> = inputs.iter().map(|a| a.dense()).collect();
    let views: Vec<_> = dense.iter().map(|d| d.view()).collect();
    let out = ndarray::concatenate(Axis(axis), &views).map_err(|_| {
        Error::incompatible(
            "concat",
            first.shape(),
            inputs.iter().find(|a| a.shape() != first.shape()).map_or(first.shape(), |a| a.shape()),
        )
    })?;
    Ok(Array::new(out, dtype).with_device(first.device()))
}

pub fn slice_axis(a: &Array, axis: usize, start: usize, end: usize) -> Result<Array, Error> {
    check_axis(axis, a.shape().len())?;
    if start > end || end > a.shape()[axis] {
        return Err(Error::InvalidIndex(format!(
            "range {}..{} is outside axis {} of extent {}",
            start,
            end,
            axis,
            a.shape()[axis]
        )));
    }
    let data = a.dense().slice_axis(Axis(axis), Slice::from(start..end)).to_owned();
    Ok(Array::new(data, a.dtype()).with_device(a.device()))
}

pub fn select(a: &Array, axis: usize, indices: &[usize]) -> Result<Array, Error> {
    check_axis(axis, a.shape().len())?;
    if let Some(&bad) = indices.iter().find(|&&i| i >= a.shape()[axis]) {
        return Err(Error::IndexOutOfBounds {
            index: bad as i64,
            size: a.shape()[axis],
        });
    }
    let data = a.dense().select(Axis(axis), indices);
    Ok(Array::new(data, a.dtype()).with_device(a.device()))
}

pub fn gather(a: &Array, offsets: &[usize], shape: &[usize]) -> Result<Array, Error> {
    let flat = a.to_vec();
    let values = offsets
        .iter()
        .map(|&o| {
            flat.get(o).copied().ok_or(Error::IndexOutOfBounds {
                index: o as i64,
                size: flat.len(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Array::from_vec(values, shape, a.dtype())?.with_device(a.device()))
}

pub fn scatter(a: &mut Array, offsets: &[usize], values: &Array) -> Result<(), Error> {
    if values.size() != offsets.len() {
        return Err(Error::ShapeMismatch {
            expected: vec![offsets.len()],
            actual: values.shape().to_vec(),
        });
    }
    let dtype = a.dtype();
    let source = values.to_vec();
    let data = a.dense_mut()?;
    let size = data.len();
    let slice = data
        .as_slice_mut()
        .ok_or_else(|| Error::InternalLogicError("dense buffer is not contiguous".to_string()))?;
    for (&o, v) in offsets.iter().zip(source) {
        let slot = slice.get_mut(o).ok_or(Error::IndexOutOfBounds {
            index: o as i64,
            size,
        })?;
        *slot = dtype.cast_value(v);
    }
    Ok(())
}
