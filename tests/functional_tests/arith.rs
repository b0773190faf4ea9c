use crate::functional_tests::{input, output, test_eq_bf16, test_eq_f16, test_eq_f32, test_eq_f64};
use half::{bf16, f16};
use omni_tensor::args;
use omni_tensor::backends::ndarray_backend::NDArrayNumericTensor;
use omni_tensor::handler::IsolatedBackend;

pub fn test_add_fp32(backend: &IsolatedBackend) {
    let a = input(backend, NDArrayNumericTensor::from_vec(vec![0.75f32, 0.9375, 0.125]));
    let b = input(backend, NDArrayNumericTensor::from_vec(vec![4.5f32, 5.5, 38.25]));
    let result = backend.call("add", args![a, b]).unwrap();
    let correct = NDArrayNumericTensor::from_vec(vec![5.25f32, 6.4375, 38.375]);
    test_eq_f32(output(backend, result), correct);
}

pub fn test_add_bf16(backend: &IsolatedBackend) {
    let a = input(
        backend,
        NDArrayNumericTensor::from_vec(vec![
            bf16::from_f32(0.75390625),
            bf16::from_f32(0.93359375),
            bf16::from_f32(0.13671875),
        ]),
    );
    let b = input(
        backend,
        NDArrayNumericTensor::from_vec(vec![
            bf16::from_f32(4.40625),
            bf16::from_f32(5.65625),
            bf16::from_f32(38.25),
        ]),
    );
    let result = backend.call("add", args![a, b]).unwrap();
    let correct = NDArrayNumericTensor::from_vec(vec![
        bf16::from_f32(5.15625),
        bf16::from_f32(6.59375),
        bf16::from_f32(38.25),
    ]);
    test_eq_bf16(output(backend, result), correct);
}

pub fn test_mul_f16(backend: &IsolatedBackend) {
    let a = input(
        backend,
        NDArrayNumericTensor::from_vec(vec![f16::from_f32(1.5), f16::from_f32(-2.0), f16::from_f32(0.25)]),
    );
    let b = input(
        backend,
        NDArrayNumericTensor::from_vec(vec![f16::from_f32(2.0), f16::from_f32(3.0), f16::from_f32(8.0)]),
    );
    let result = backend.call("multiply", args![a, b]).unwrap();
    let correct = NDArrayNumericTensor::from_vec(vec![f16::from_f32(3.0), f16::from_f32(-6.0), f16::from_f32(2.0)]);
    test_eq_f16(output(backend, result), correct);
}

pub fn test_sub_broadcast_fp32(backend: &IsolatedBackend) {
    let a = input(
        backend,
        NDArrayNumericTensor::from_vec_shape(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap(),
    );
    let b = input(backend, NDArrayNumericTensor::from_vec(vec![1.0f32, 1.0, 2.0]));
    let result = backend.call("subtract", args![a, b]).unwrap();
    let correct = NDArrayNumericTensor::from_vec_shape(vec![0.0f32, 1.0, 1.0, 3.0, 4.0, 4.0], &[2, 3]).unwrap();
    test_eq_f32(output(backend, result), correct);
}

pub fn test_scalar_literal_keeps_array_dtype(backend: &IsolatedBackend) {
    let a = input(backend, NDArrayNumericTensor::from_vec(vec![1.0f32, 2.0]));
    let result = backend.call("multiply", args![a, 2.5]).unwrap();
    test_eq_f32(output(backend, result), NDArrayNumericTensor::from_vec(vec![2.5f32, 5.0]));
}

pub fn test_integer_divide_is_true_division(backend: &IsolatedBackend) {
    let a = input(backend, NDArrayNumericTensor::from_vec(vec![1i64, 2, 3]));
    let b = input(backend, NDArrayNumericTensor::from_vec(vec![2i64, 2, 2]));
    let result = backend.call("divide", args![a, b]).unwrap();
    test_eq_f64(output(backend, result), NDArrayNumericTensor::from_vec(vec![0.5f64, 1.0, 1.5]));
}

pub fn test_unary_fp32(backend: &IsolatedBackend) {
    let x = input(backend, NDArrayNumericTensor::from_vec(vec![-4.0f32, 0.0, 9.0]));
    let abs = backend.call("abs", args![x.clone()]).unwrap();
    test_eq_f32(output(backend, abs.clone()), NDArrayNumericTensor::from_vec(vec![4.0f32, 0.0, 9.0]));
    let sqrt = backend.call("sqrt", args![abs]).unwrap();
    test_eq_f32(output(backend, sqrt), NDArrayNumericTensor::from_vec(vec![2.0f32, 0.0, 3.0]));
    let neg = backend.call("negative", args![x]).unwrap();
    test_eq_f32(output(backend, neg), NDArrayNumericTensor::from_vec(vec![4.0f32, 0.0, -9.0]));
    let exp = backend
        .call("exp", args![input(backend, NDArrayNumericTensor::from_vec(vec![0.0f32, 1.0]))])
        .unwrap();
    test_eq_f32(
        output(backend, exp),
        NDArrayNumericTensor::from_vec(vec![1.0f32, std::f32::consts::E]),
    );
}

pub fn test_square_is_compositional_everywhere(backend: &IsolatedBackend) {
    let f = backend.namespace().function("square").unwrap();
    assert!(f.is_compositional());
    let x = input(backend, NDArrayNumericTensor::from_vec(vec![-3.0f32, 0.5]));
    let result = backend.call("square", args![x]).unwrap();
    test_eq_f32(output(backend, result), NDArrayNumericTensor::from_vec(vec![9.0f32, 0.25]));
}
