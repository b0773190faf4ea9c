use omni_tensor::backends::ndarray_backend::NDArrayNumericTensor;
use omni_tensor::dtype::DType;
use omni_tensor::handler::IsolatedBackend;
use omni_tensor::{Array, Value};

pub mod arith;
pub mod linalg;
pub mod reduce;

/// Tracked array holding `tensor` in the backend's native form.
pub fn input(backend: &IsolatedBackend, tensor: NDArrayNumericTensor) -> Value {
    let native = backend.backend().module().from_neutral(&tensor).unwrap();
    Value::Array(Array::new(native))
}

pub fn output(backend: &IsolatedBackend, value: Value) -> NDArrayNumericTensor {
    let array = value.as_array().expect("function should return an array");
    backend.backend().module().to_neutral(&array.data()).unwrap()
}

fn test_eq(value: NDArrayNumericTensor, correct: NDArrayNumericTensor, atol: f64, rtol: f64) {
    assert_eq!(value.shape(), correct.shape());
    let value_vec = value.to_f64_vec();
    let correct_vec = correct.to_f64_vec();
    for i in 0..value_vec.len() {
        let a = value_vec[i];
        let b = correct_vec[i];
        let err = (a - b).abs();
        let limit = atol + rtol * (a.abs().max(b.abs()));
        assert!(err < limit, "{a} != {b}: {err} < {limit}");
    }
}

pub fn test_eq_f16(value: NDArrayNumericTensor, correct: NDArrayNumericTensor) {
    assert_eq!(value.dtype(), DType::F16);
    test_eq(value, correct, 1e-5, 4e-3);
}

pub fn test_eq_bf16(value: NDArrayNumericTensor, correct: NDArrayNumericTensor) {
    assert_eq!(value.dtype(), DType::BF16);
    test_eq(value, correct, 1e-5, 1.6e-2);
}

pub fn test_eq_f32(value: NDArrayNumericTensor, correct: NDArrayNumericTensor) {
    assert_eq!(value.dtype(), DType::F32);
    test_eq(value, correct, 1e-5, 1.3e-6);
}

pub fn test_eq_f64(value: NDArrayNumericTensor, correct: NDArrayNumericTensor) {
    assert_eq!(value.dtype(), DType::F64);
    test_eq(value, correct, 1e-9, 1e-12);
}
