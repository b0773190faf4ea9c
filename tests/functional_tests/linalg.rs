use crate::functional_tests::{input, output, test_eq_f32};
use omni_tensor::args;
use omni_tensor::backends::ndarray_backend::NDArrayNumericTensor;
use omni_tensor::dtype::DType;
use omni_tensor::handler::IsolatedBackend;
use omni_tensor::Value;

pub fn test_matmul_2_3_fp32(backend: &IsolatedBackend) {
    let a = input(
        backend,
        NDArrayNumericTensor::from_vec_shape(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap(),
    );
    let b = input(
        backend,
        NDArrayNumericTensor::from_vec_shape(vec![1.0f32, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2]).unwrap(),
    );
    let result = backend.call("linalg.matmul", args![a, b]).unwrap();
    let correct = NDArrayNumericTensor::from_vec_shape(vec![4.0f32, 5.0, 10.0, 11.0], &[2, 2]).unwrap();
    test_eq_f32(output(backend, result), correct);
}

pub fn test_matmul_vector_matrix_fp32(backend: &IsolatedBackend) {
    let v = input(backend, NDArrayNumericTensor::from_vec(vec![1.0f32, 2.0, 3.0]));
    let m = input(
        backend,
        NDArrayNumericTensor::from_vec_shape(vec![1.0f32, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2]).unwrap(),
    );
    let result = backend.call("linalg.matmul", args![v, m]).unwrap();
    test_eq_f32(output(backend, result), NDArrayNumericTensor::from_vec(vec![4.0f32, 5.0]));
}

pub fn test_matrix_transpose_fp32(backend: &IsolatedBackend) {
    let a = input(
        backend,
        NDArrayNumericTensor::from_vec_shape(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap(),
    );
    let result = backend.call("linalg.matrix_transpose", args![a]).unwrap();
    let correct = NDArrayNumericTensor::from_vec_shape(vec![1.0f32, 4.0, 2.0, 5.0, 3.0, 6.0], &[3, 2]).unwrap();
    test_eq_f32(output(backend, result), correct);
}

pub fn test_vector_norm_and_vecdot_fp32(backend: &IsolatedBackend) {
    let x = input(backend, NDArrayNumericTensor::from_vec(vec![3.0f32, 4.0]));
    let y = input(backend, NDArrayNumericTensor::from_vec(vec![2.0f32, -1.0]));
    let norm = backend.call("linalg.vector_norm", args![x.clone()]).unwrap();
    test_eq_f32(output(backend, norm), NDArrayNumericTensor::scalar(5.0f32));
    let dot = backend.call("linalg.vecdot", args![x, y]).unwrap();
    test_eq_f32(output(backend, dot), NDArrayNumericTensor::scalar(2.0f32));
}

pub fn test_linear_layer_fp32(backend: &IsolatedBackend) {
    let x = backend
        .call("asarray", args![vec![vec![1.0, 2.0], vec![3.0, 4.0]]; dtype = DType::F32])
        .unwrap();
    let weight = backend
        .call("ones", args![Value::Shape(vec![3, 2]); dtype = DType::F32])
        .unwrap();
    let bias = input(backend, NDArrayNumericTensor::from_vec(vec![0.0f32, 1.0, 2.0]));
    let result = backend.call("layers.linear", args![x.clone(), weight.clone(), bias]).unwrap();
    let correct = NDArrayNumericTensor::from_vec_shape(vec![3.0f32, 4.0, 5.0, 7.0, 8.0, 9.0], &[2, 3]).unwrap();
    test_eq_f32(output(backend, result), correct);

    let result = backend.call("layers.linear", args![x, weight]).unwrap();
    let correct = NDArrayNumericTensor::from_vec_shape(vec![3.0f32, 3.0, 3.0, 7.0, 7.0, 7.0], &[2, 3]).unwrap();
    test_eq_f32(output(backend, result), correct);
}
