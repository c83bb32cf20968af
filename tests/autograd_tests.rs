use approx::assert_relative_eq;
use rust_ndarray_lib::test_utils::check_gradient;
use rust_ndarray_lib::{
    autograd, ops, BackwardOptions, CpuTensor, DataType, Error, ErrorKind, GradReq, SparseFormat,
};
use serial_test::serial;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn leaf(values: Vec<f64>, shape: &[usize]) -> CpuTensor {
    let t = CpuTensor::from_vec(values, shape).unwrap();
    t.attach_grad().unwrap();
    t
}

const EPSILON: f64 = 1e-6;
const TOLERANCE: f64 = 1e-4;

#[test]
#[serial]
fn test_square_sum_gradient() -> Result<(), Error> {
    init_logger();
    let x = leaf(vec![1.0, 2.0, 3.0], &[3]);
    let y = {
        let _recording = autograd::record();
        x.square()?.sum(&[], false)?
    };
    assert!(y.tracks_grad());
    y.backward()?;
    assert_eq!(x.get_gradient()?.to_vec::<f64>()?, vec![2.0, 4.0, 6.0]);
    Ok(())
}

#[test]
#[serial]
fn test_shared_input_accumulates() -> Result<(), Error> {
    let x = leaf(vec![3.0, -1.0], &[2]);
    let y = {
        let _recording = autograd::record();
        let prod = x.mul(&x)?;
        prod.add(&x)?.sum(&[], false)?
    };
    y.backward()?;
    // d(x^2 + x)/dx = 2x + 1
    assert_eq!(x.get_gradient()?.to_vec::<f64>()?, vec![7.0, -1.0]);
    Ok(())
}

#[test]
#[serial]
fn test_broadcast_gradient_is_reduced() -> Result<(), Error> {
    let a = leaf(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let bias = leaf(vec![0.5, 0.5, 0.5], &[3]);
    let y = {
        let _recording = autograd::record();
        a.add(&bias)?.sum(&[], false)?
    };
    y.backward()?;
    let grad = bias.get_gradient()?;
    assert_eq!(grad.shape().dims(), &[3]);
    assert_eq!(grad.to_vec::<f64>()?, vec![2.0, 2.0, 2.0]);
    assert_eq!(a.get_gradient()?.to_vec::<f64>()?, vec![1.0; 6]);
    Ok(())
}

#[test]
#[serial]
fn test_nothing_recorded_without_guard() -> Result<(), Error> {
    let x = leaf(vec![1.0, 2.0], &[2]);
    let y = x.mul_scalar(2.0)?;
    assert!(!y.tracks_grad());
    assert_eq!(y.backward().unwrap_err().kind(), ErrorKind::InvalidOperation);

    let z = {
        let _recording = autograd::record();
        let _paused = autograd::pause();
        x.mul_scalar(2.0)?
    };
    assert!(z.op().is_none());
    Ok(())
}

#[test]
#[serial]
fn test_untracked_inputs_are_not_recorded() -> Result<(), Error> {
    let plain = CpuTensor::from_vec(vec![1.0f64, 2.0], &[2])?;
    let _recording = autograd::record();
    let y = plain.exp()?;
    assert!(y.op().is_none());
    assert!(!plain.has_gradient());
    assert!(matches!(plain.get_gradient(), Err(Error::NoGradient(_))));
    Ok(())
}

#[test]
#[serial]
fn test_non_differentiable_ops_cut_the_graph() -> Result<(), Error> {
    let x = leaf(vec![1.0, 5.0, 3.0], &[3]);
    let _recording = autograd::record();
    assert!(!x.argmax()?.tracks_grad());
    assert!(!x.gt_scalar(2.0)?.tracks_grad());
    assert!(!x.sort(0, true)?.tracks_grad());
    assert!(!x.as_type(DataType::Float32, true)?.tracks_grad());
    assert!(x.exp()?.tracks_grad());
    Ok(())
}

#[test]
#[serial]
fn test_grad_req_policies() -> Result<(), Error> {
    let acc = CpuTensor::from_vec(vec![1.0f64, 1.0], &[2])?;
    acc.attach_grad_with(GradReq::Add, None)?;
    let frozen = CpuTensor::from_vec(vec![2.0f64, 2.0], &[2])?;
    frozen.attach_grad_with(GradReq::Null, None)?;
    assert!(!frozen.requires_grad());
    assert_eq!(frozen.grad_req(), Some(GradReq::Null));

    let y = {
        let _recording = autograd::record();
        acc.mul(&frozen)?.sum(&[], false)?
    };
    y.backward_with_options(BackwardOptions {
        retain_graph: true,
        is_training: true,
    })?;
    assert_eq!(acc.get_gradient()?.to_vec::<f64>()?, vec![2.0, 2.0]);
    y.backward()?;
    assert_eq!(acc.get_gradient()?.to_vec::<f64>()?, vec![4.0, 4.0]);
    assert_eq!(frozen.get_gradient()?.to_vec::<f64>()?, vec![0.0, 0.0]);

    acc.zero_grad()?;
    assert_eq!(acc.get_gradient()?.to_vec::<f64>()?, vec![0.0, 0.0]);
    Ok(())
}

#[test]
#[serial]
fn test_graph_is_freed_after_backward() -> Result<(), Error> {
    let x = leaf(vec![1.0, 2.0], &[2]);
    let y = {
        let _recording = autograd::record();
        x.mul_scalar(4.0)?.sum(&[], false)?
    };
    y.backward()?;
    assert!(y.op().is_none());
    assert!(y.backward().is_err());
    Ok(())
}

#[test]
#[serial]
fn test_inference_mode_leaves_buffers() -> Result<(), Error> {
    let x = leaf(vec![1.0, 2.0], &[2]);
    let y = {
        let _recording = autograd::record();
        x.square()?.sum(&[], false)?
    };
    y.backward_with_options(BackwardOptions {
        retain_graph: false,
        is_training: false,
    })?;
    assert_eq!(x.get_gradient()?.to_vec::<f64>()?, vec![0.0, 0.0]);
    Ok(())
}

#[test]
#[serial]
fn test_explicit_head_gradient() -> Result<(), Error> {
    let x = leaf(vec![1.0, 2.0, 3.0], &[3]);
    let y = {
        let _recording = autograd::record();
        x.mul_scalar(2.0)?
    };
    let wrong = CpuTensor::ones(&[2], DataType::Float64)?;
    assert_eq!(
        y.backward_with_grad(&wrong, BackwardOptions::default()).unwrap_err().kind(),
        ErrorKind::ShapeMismatch
    );

    let head = CpuTensor::from_vec(vec![1.0f64, 0.0, -1.0], &[3])?;
    y.backward_with_grad(&head, BackwardOptions::default())?;
    assert_eq!(x.get_gradient()?.to_vec::<f64>()?, vec![2.0, 0.0, -2.0]);
    Ok(())
}

#[test]
#[serial]
fn test_reattaching_makes_a_leaf() -> Result<(), Error> {
    let x = leaf(vec![1.0, 2.0], &[2]);
    let _recording = autograd::record();
    let y = x.mul_scalar(3.0)?;
    assert!(y.op().is_some());
    y.attach_grad()?;
    assert!(y.op().is_none());
    assert!(y.requires_grad());

    let z = y.square()?.sum(&[], false)?;
    z.backward()?;
    assert_eq!(y.get_gradient()?.to_vec::<f64>()?, vec![6.0, 12.0]);
    assert_eq!(x.get_gradient()?.to_vec::<f64>()?, vec![0.0, 0.0]);
    Ok(())
}

#[test]
#[serial]
fn test_sparse_gradient_buffer() -> Result<(), Error> {
    let w = leaf(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
    w.attach_grad_with(GradReq::Write, Some(SparseFormat::RowSparse))?;
    assert_eq!(w.get_gradient()?.format(), SparseFormat::RowSparse);

    let y = {
        let _recording = autograd::record();
        w.get_expr("1")?.sum(&[], false)?
    };
    y.backward()?;
    let grad = w.get_gradient()?;
    assert_eq!(grad.format(), SparseFormat::RowSparse);
    assert_eq!(grad.to_vec::<f64>()?, vec![0.0, 0.0, 1.0, 1.0]);
    Ok(())
}

#[test]
#[serial]
fn test_closing_array_drops_gradient() -> Result<(), Error> {
    let x = leaf(vec![1.0], &[1]);
    let grad = x.get_gradient()?;
    x.close()?;
    assert!(grad.is_closed());
    assert!(!x.has_gradient());
    Ok(())
}

#[test]
#[serial]
fn test_softmax_gradient_sums_to_zero() -> Result<(), Error> {
    let x = leaf(vec![0.1, 0.7, -0.3], &[3]);
    let weights = CpuTensor::from_vec(vec![1.0f64, 2.0, 3.0], &[3])?;
    let y = {
        let _recording = autograd::record();
        x.softmax(&[], 1.0)?.mul(&weights)?.sum(&[], false)?
    };
    y.backward()?;
    let grad = x.get_gradient()?.to_vec::<f64>()?;
    assert_relative_eq!(grad.iter().sum::<f64>(), 0.0, epsilon = 1e-12);
    Ok(())
}

// --- Numerical checks ---

#[test]
#[serial]
fn test_elementwise_grad_check() -> Result<(), Error> {
    init_logger();
    let a = leaf(vec![0.5, 1.5, 2.0, 3.0], &[2, 2]);
    let b = leaf(vec![1.2, 0.8, 2.5, 1.1], &[2, 2]);
    let inputs = vec![a, b];

    let mul_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        inputs[0].mul(&inputs[1])?.sum(&[], false)
    };
    check_gradient(mul_fn, &inputs, 0, EPSILON, TOLERANCE)?;
    check_gradient(mul_fn, &inputs, 1, EPSILON, TOLERANCE)?;

    let div_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        inputs[0].div(&inputs[1])?.sum(&[], false)
    };
    check_gradient(div_fn, &inputs, 0, EPSILON, TOLERANCE)?;
    check_gradient(div_fn, &inputs, 1, EPSILON, TOLERANCE)?;

    let pow_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        inputs[0].pow(&inputs[1])?.sum(&[], false)
    };
    check_gradient(pow_fn, &inputs, 0, EPSILON, TOLERANCE)?;
    check_gradient(pow_fn, &inputs, 1, EPSILON, TOLERANCE)?;

    let max_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        inputs[0].maximum(&inputs[1])?.sum(&[], false)
    };
    check_gradient(max_fn, &inputs, 0, EPSILON, TOLERANCE)?;
    check_gradient(max_fn, &inputs, 1, EPSILON, TOLERANCE)?;
    Ok(())
}

#[test]
#[serial]
fn test_unary_grad_check() -> Result<(), Error> {
    let x = leaf(vec![0.2, 0.4, 0.9], &[3]);
    let inputs = vec![x];
    let fns: Vec<fn(&CpuTensor) -> Result<CpuTensor, Error>> = vec![
        CpuTensor::exp,
        CpuTensor::log,
        CpuTensor::sqrt,
        CpuTensor::tanh,
        CpuTensor::sin,
        CpuTensor::cos,
        CpuTensor::atan,
        CpuTensor::asin,
        CpuTensor::sinh,
        CpuTensor::log2,
    ];
    for f in fns {
        let loss = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> { f(&inputs[0])?.sum(&[], false) };
        check_gradient(loss, &inputs, 0, EPSILON, TOLERANCE)?;
    }
    Ok(())
}

#[test]
#[serial]
fn test_reduction_grad_check() -> Result<(), Error> {
    let x = leaf(vec![0.3, -1.2, 2.2, 0.7, 1.9, -0.4], &[2, 3]);
    let weights = CpuTensor::from_vec(vec![1.0f64, -2.0, 0.5], &[3])?;
    let inputs = vec![x];

    let mean_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        inputs[0].mean(&[0], false)?.mul(&weights)?.sum(&[], false)
    };
    check_gradient(mean_fn, &inputs, 0, EPSILON, TOLERANCE)?;

    let softmax_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        inputs[0].softmax(&[1], 2.0)?.mul(&weights)?.sum(&[], false)
    };
    check_gradient(softmax_fn, &inputs, 0, EPSILON, TOLERANCE)?;

    let keep_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        inputs[0].sum(&[1], true)?.square()?.sum(&[], false)
    };
    check_gradient(keep_fn, &inputs, 0, EPSILON, TOLERANCE)?;
    Ok(())
}

#[test]
#[serial]
fn test_matmul_grad_check() -> Result<(), Error> {
    let a = leaf(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let b = leaf(vec![0.5, -1.0, 1.5, 2.0, -0.5, 1.0], &[3, 2]);
    let inputs = vec![a, b];
    let matmul_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        ops::matmul(&inputs[0], &inputs[1])?.square()?.sum(&[], false)
    };
    check_gradient(matmul_fn, &inputs, 0, EPSILON, TOLERANCE)?;
    check_gradient(matmul_fn, &inputs, 1, EPSILON, TOLERANCE)?;
    Ok(())
}

#[test]
#[serial]
fn test_structural_grad_check() -> Result<(), Error> {
    let a = leaf(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6], &[2, 3]);
    let b = leaf(vec![1.0, -1.0, 2.0], &[1, 3]);
    let weights = CpuTensor::from_vec(vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0], &[3, 3])?;
    let inputs = vec![a, b];

    let concat_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        ops::concat(&[&inputs[0], &inputs[1]], 0)?.mul(&weights)?.sum(&[], false)
    };
    check_gradient(concat_fn, &inputs, 0, EPSILON, TOLERANCE)?;
    check_gradient(concat_fn, &inputs, 1, EPSILON, TOLERANCE)?;

    let transpose_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        let t = inputs[0].transpose()?;
        t.mul(&weights.slice_axis(1, 0, 2)?)?.square()?.sum(&[], false)
    };
    check_gradient(transpose_fn, &inputs, 0, EPSILON, TOLERANCE)?;

    let broadcast_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        inputs[1].broadcast(&[3, 3])?.mul(&weights)?.sum(&[], false)
    };
    check_gradient(broadcast_fn, &inputs, 1, EPSILON, TOLERANCE)?;

    let reshape_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        inputs[0].reshape(&[3, 2])?.slice_axis(0, 1, 3)?.square()?.sum(&[], false)
    };
    check_gradient(reshape_fn, &inputs, 0, EPSILON, TOLERANCE)?;

    let get_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        inputs[0].get_expr(":, ::2")?.exp()?.sum(&[], false)
    };
    check_gradient(get_fn, &inputs, 0, EPSILON, TOLERANCE)?;

    let clip_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        inputs[0].clip(0.15, 0.45)?.square()?.sum(&[], false)
    };
    check_gradient(clip_fn, &inputs, 0, EPSILON, TOLERANCE)?;
    Ok(())
}

#[test]
#[serial]
fn test_stack_unstack_grad_check() -> Result<(), Error> {
    let a = leaf(vec![0.1, 0.2, 0.3], &[3]);
    let b = leaf(vec![1.0, 2.0, 3.0], &[3]);
    let inputs = vec![a, b];

    let stack_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        let s = ops::stack(&[&inputs[0], &inputs[1]], 1)?;
        s.sum(&[1], false)?.square()?.sum(&[], false)
    };
    check_gradient(stack_fn, &inputs, 0, EPSILON, TOLERANCE)?;
    check_gradient(stack_fn, &inputs, 1, EPSILON, TOLERANCE)?;

    let unstack_fn = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> {
        let stacked = ops::stack(&[&inputs[0], &inputs[1]], 0)?;
        let rows = stacked.unstack(0)?;
        rows[1].mul(&rows[0])?.sum(&[], false)
    };
    check_gradient(unstack_fn, &inputs, 0, EPSILON, TOLERANCE)?;
    check_gradient(unstack_fn, &inputs, 1, EPSILON, TOLERANCE)?;
    Ok(())
}

#[test]
#[serial]
fn test_grad_check_rejects_untracked_input() -> Result<(), Error> {
    let x = CpuTensor::from_vec(vec![1.0f64], &[1])?;
    let identity = |inputs: &[CpuTensor]| -> Result<CpuTensor, Error> { inputs[0].sum(&[], false) };
    assert!(matches!(
        check_gradient(identity, &[x], 0, EPSILON, TOLERANCE),
        Err(Error::NoGradient(_))
    ));
    Ok(())
}

#[test]
#[serial]
fn test_backward_rejects_input_modified_after_recording() -> Result<(), Error> {
    let x = leaf(vec![1.0, 2.0], &[2]);
    let w = CpuTensor::from_vec(vec![3.0f64, 4.0], &[2])?;
    let y = {
        let _recording = autograd::record();
        x.mul(&w)?.sum(&[], false)?
    };
    // Outside the recording block the in-place guard no longer applies
    w.muli(&CpuTensor::from_vec(vec![10.0f64, 10.0], &[2])?)?;
    let err = y.backward().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert_eq!(x.get_gradient()?.to_vec::<f64>()?, vec![0.0, 0.0]);

    // A graph recorded after the write differentiates normally
    let y = {
        let _recording = autograd::record();
        x.mul(&w)?.sum(&[], false)?
    };
    y.backward()?;
    assert_eq!(x.get_gradient()?.to_vec::<f64>()?, vec![30.0, 40.0]);
    Ok(())
}
