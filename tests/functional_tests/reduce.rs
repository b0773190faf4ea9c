use crate::functional_tests::{input, output, test_eq_f32, test_eq_f64};
use omni_tensor::args;
use omni_tensor::backends::ndarray_backend::NDArrayNumericTensor;
use omni_tensor::handler::IsolatedBackend;
use omni_tensor::handler::function::FunctionError;

fn matrix(backend: &IsolatedBackend) -> omni_tensor::Value {
    input(
        backend,
        NDArrayNumericTensor::from_vec_shape(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap(),
    )
}

pub fn test_sum_fp32(backend: &IsolatedBackend) {
    let result = backend.call("sum", args![matrix(backend)]).unwrap();
    test_eq_f32(output(backend, result), NDArrayNumericTensor::scalar(21.0f32));
}

pub fn test_mean_fp32(backend: &IsolatedBackend) {
    let result = backend.call("mean", args![matrix(backend)]).unwrap();
    test_eq_f32(output(backend, result), NDArrayNumericTensor::scalar(3.5f32));
}

pub fn test_mean_of_integers_is_float64(backend: &IsolatedBackend) {
    let x = input(backend, NDArrayNumericTensor::from_vec(vec![1i64, 2, 4, 5]));
    let result = backend.call("mean", args![x]).unwrap();
    test_eq_f64(output(backend, result), NDArrayNumericTensor::scalar(3.0f64));
}

pub fn test_var_std_fp32(backend: &IsolatedBackend) {
    let x = input(backend, NDArrayNumericTensor::from_vec(vec![2.0f32, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]));
    let var = backend.call("var", args![x.clone()]).unwrap();
    test_eq_f32(output(backend, var), NDArrayNumericTensor::scalar(4.0f32));
    let std = backend.call("std", args![x]).unwrap();
    test_eq_f32(output(backend, std), NDArrayNumericTensor::scalar(2.0f32));
}

pub fn test_axis_reductions_are_rejected(backend: &IsolatedBackend) {
    let err = backend.call("sum", args![matrix(backend); axis = 0]).unwrap_err();
    assert!(matches!(err, FunctionError::InvalidArgument { .. }), "{err}");
    let err = backend.call("mean", args![matrix(backend); axis = 1]).unwrap_err();
    assert!(matches!(err, FunctionError::InvalidArgument { .. }), "{err}");
}
