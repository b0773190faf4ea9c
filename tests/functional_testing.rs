use omni_tensor::handler::{BackendHandler, IsolatedBackend};
use omni_tensor::HandlerConfig;
use paste::paste;
mod functional_tests;
use functional_tests::arith::*;
use functional_tests::linalg::*;
use functional_tests::reduce::*;

fn run_backend_test(name: &str, test: impl FnOnce(&IsolatedBackend)) {
    let _ = env_logger::builder().is_test(true).try_init();
    let handler = BackendHandler::with_builtin_backends(HandlerConfig::default());
    let backend = handler.with_backend(name).unwrap();
    test(&backend)
}

fn run_ndarray_test(test: impl FnOnce(&IsolatedBackend)) {
    run_backend_test("ndarray", test)
}

fn run_traced_test(test: impl FnOnce(&IsolatedBackend)) {
    run_backend_test("traced", test)
}

#[cfg(feature = "candle")]
fn run_candle_test(test: impl FnOnce(&IsolatedBackend)) {
    run_backend_test("candle", test)
}

macro_rules! do_test {
    ($runner_fn:expr, $runner_name:ident, $test_name:ident) => {
        paste! {
            #[allow(non_snake_case)]
            #[test]
            fn [<$runner_name _ $test_name>]() {
                $runner_fn($test_name);
            }
        }
    };
}

macro_rules! do_tests {
    ($runner_fn:expr, $runner_name:ident) => {
        do_test!($runner_fn, $runner_name, test_add_fp32);
        do_test!($runner_fn, $runner_name, test_add_bf16);
        do_test!($runner_fn, $runner_name, test_mul_f16);
        do_test!($runner_fn, $runner_name, test_sub_broadcast_fp32);
        do_test!($runner_fn, $runner_name, test_scalar_literal_keeps_array_dtype);
        do_test!($runner_fn, $runner_name, test_integer_divide_is_true_division);
        do_test!($runner_fn, $runner_name, test_unary_fp32);
        do_test!($runner_fn, $runner_name, test_square_is_compositional_everywhere);
        do_test!($runner_fn, $runner_name, test_sum_fp32);
        do_test!($runner_fn, $runner_name, test_mean_fp32);
        do_test!($runner_fn, $runner_name, test_mean_of_integers_is_float64);
        do_test!($runner_fn, $runner_name, test_var_std_fp32);
        do_test!($runner_fn, $runner_name, test_axis_reductions_are_rejected);
        do_test!($runner_fn, $runner_name, test_matmul_2_3_fp32);
        do_test!($runner_fn, $runner_name, test_matmul_vector_matrix_fp32);
        do_test!($runner_fn, $runner_name, test_matrix_transpose_fp32);
        do_test!($runner_fn, $runner_name, test_vector_norm_and_vecdot_fp32);
        do_test!($runner_fn, $runner_name, test_linear_layer_fp32);
    };
}

do_tests!(run_ndarray_test, ndarray);
do_tests!(run_traced_test, traced);
#[cfg(feature = "candle")]
do_tests!(run_candle_test, candle);
