use crate::{autograd, Backend, Error, ResourceScope, Tensor};

/// Checks the gradient of a function with respect to a specific input array.
///
/// # Arguments
/// * `func`: A closure that takes a slice of input arrays and returns a single-element array (the loss).
/// * `inputs`: A slice of input arrays. The checked one must have a gradient attached.
/// * `input_idx`: The index in the `inputs` slice for which to check the gradient.
/// * `epsilon`: A small value for finite difference perturbation (e.g., 1e-6 for float64 inputs).
/// * `tolerance`: The maximum allowed relative or absolute difference between analytical and numerical gradients.
///
/// # Returns
/// * `Ok(())` if the gradients match within the tolerance.
/// * [`Error::GradientCheckError`] describing the worst mismatch otherwise.
pub fn check_gradient<B, F>(
    func: F,
    inputs: &[Tensor<B>],
    input_idx: usize,
    epsilon: f64,
    tolerance: f64,
) -> Result<(), Error>
where
    B: Backend,
    F: Fn(&[Tensor<B>]) -> Result<Tensor<B>, Error>,
{
    if input_idx >= inputs.len() {
        return Err(Error::InvalidOperation(format!(
            "input_idx ({}) is out of bounds for inputs slice (len {})",
            input_idx,
            inputs.len()
        )));
    }

    let target = &inputs[input_idx];
    if !target.requires_grad() {
        return Err(Error::NoGradient(target.id()));
    }

    let analytical = compute_analytical_gradient(&func, inputs, input_idx)?;
    let numerical = compute_numerical_gradient(&func, inputs, input_idx, epsilon)?;
    compare_gradients(&analytical, &numerical, tolerance)
}

fn loss_value<B: Backend>(loss: &Tensor<B>) -> Result<f64, Error> {
    if loss.size() != 1 {
        return Err(Error::InvalidOperation(format!(
            "Function must return a single-element array for gradient checking, got shape {}",
            loss.shape()
        )));
    }
    loss.to_f64_vec()?.first().copied().ok_or(Error::EmptyTensor)
}

fn compute_analytical_gradient<B, F>(func: &F, inputs: &[Tensor<B>], input_idx: usize) -> Result<Vec<f64>, Error>
where
    B: Backend,
    F: Fn(&[Tensor<B>]) -> Result<Tensor<B>, Error>,
{
    for input in inputs.iter().filter(|t| t.requires_grad()) {
        input.zero_grad()?;
    }

    let loss = {
        let _recording = autograd::record();
        func(inputs)?
    };
    loss_value(&loss)?;
    loss.backward()?;
    loss.close()?;

    inputs[input_idx].get_gradient()?.to_f64_vec()
}

fn compute_numerical_gradient<B, F>(
    func: &F,
    inputs: &[Tensor<B>],
    input_idx: usize,
    epsilon: f64,
) -> Result<Vec<f64>, Error>
where
    B: Backend,
    F: Fn(&[Tensor<B>]) -> Result<Tensor<B>, Error>,
{
    let original = inputs[input_idx].to_f64_vec()?;
    let mut numerical = vec![0.0; original.len()];

    // Forward passes over perturbed copies; everything they produce joins the scope
    let scope = ResourceScope::new();
    let perturbed = inputs[input_idx].dup()?;
    perturbed.attach(&scope)?;
    let mut shifted_inputs = inputs.to_vec();
    shifted_inputs[input_idx] = perturbed.clone();

    let evaluate = |values: &[f64]| -> Result<f64, Error> {
        perturbed.set_data(values)?;
        let loss = func(&shifted_inputs)?;
        let value = loss_value(&loss);
        if !loss.is_closed() && !loss.is_attached() {
            loss.close()?;
        }
        value
    };

    let mut values = original.clone();
    for i in 0..original.len() {
        values[i] = original[i] + epsilon;
        let loss_plus = evaluate(&values)?;
        values[i] = original[i] - epsilon;
        let loss_minus = evaluate(&values)?;
        values[i] = original[i];

        numerical[i] = (loss_plus - loss_minus) / (2.0 * epsilon);
    }

    shifted_inputs.clear();
    scope.close();
    Ok(numerical)
}

fn compare_gradients(analytical: &[f64], numerical: &[f64], tolerance: f64) -> Result<(), Error> {
    if analytical.len() != numerical.len() {
        return Err(Error::InternalLogicError(format!(
            "Gradient size mismatch: analytical size={}, numerical size={}",
            analytical.len(),
            numerical.len()
        )));
    }

    let mut max_rel_err = 0.0;
    let mut max_abs_err = 0.0;
    let mut max_err_idx = 0;

    for (i, (a, n)) in analytical.iter().zip(numerical.iter()).enumerate() {
        let abs_err = (a - n).abs();
        let rel_err = if a.abs() > 1e-8 && n.abs() > 1e-8 {
            abs_err / a.abs().max(n.abs())
        } else {
            abs_err
        };

        if rel_err > max_rel_err {
            max_rel_err = rel_err;
            max_abs_err = abs_err;
            max_err_idx = i;
        }
    }

    if max_rel_err <= tolerance {
        Ok(())
    } else {
        Err(Error::GradientCheckError {
            analytical: analytical.to_vec(),
            numerical: numerical.to_vec(),
            max_rel_error: max_rel_err,
            max_abs_error: max_abs_err,
            at_index: max_err_idx,
        })
    }
}

/// Asserts that two arrays have the same shape and element-wise equal values.
pub fn assert_tensor_eq<B: Backend>(a: &Tensor<B>, b: &Tensor<B>) {
    assert_eq!(a.shape(), b.shape(), "Shapes don't match");
    let a_data = a.to_f64_vec().unwrap();
    let b_data = b.to_f64_vec().unwrap();
    for (i, (a_val, b_val)) in a_data.iter().zip(b_data.iter()).enumerate() {
        assert_eq!(
            *a_val, *b_val,
            "Values at index {i} don't match: a={a_val}, b={b_val}"
        );
    }
}

/// Asserts that two arrays have the same shape and values within `tol`.
pub fn assert_tensor_close<B: Backend>(a: &Tensor<B>, b: &Tensor<B>, tol: f64) {
    assert_eq!(a.shape(), b.shape(), "Shapes don't match");
    let a_data = a.to_f64_vec().unwrap();
    let b_data = b.to_f64_vec().unwrap();
    for (i, (a_val, b_val)) in a_data.iter().zip(b_data.iter()).enumerate() {
        assert!(
            (a_val - b_val).abs() < tol,
            "Values at index {i} aren't close enough: a={a_val}, b={b_val}, diff={}, tol={tol}",
            (a_val - b_val).abs()
        );
    }
}
