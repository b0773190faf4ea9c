use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use omni_tensor::backends::ndarray_backend::NDArrayNumericTensor;
use omni_tensor::backends::traced_backend::{TracedBackend, TracedTensor};
use omni_tensor::backends::{BackendModule, builtin_registry};
use omni_tensor::handler::function::ModuleTable;
use omni_tensor::handler::converter::{ConversionError, export_to_neutral, import_from_neutral};
use omni_tensor::native_array::{ForeignArray, NativeArray};
use omni_tensor::{Array, BackendHandler, Container, HandlerConfig, HandlerError};

// Conversion walks every live tracked object in the process, so tests that
// create opted-in objects must not overlap.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    let _ = env_logger::builder().is_test(true).try_init();
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

fn handler() -> BackendHandler {
    BackendHandler::with_builtin_backends(HandlerConfig::default())
}

fn values(handler: &BackendHandler, array: &Array) -> Vec<f64> {
    let payload = array.data();
    let module = handler.registry().module_for_payload(&payload).unwrap().unwrap();
    module.to_neutral(&payload).unwrap().to_f64_vec()
}

fn is_traced_variable(array: &Array) -> bool {
    match array.data() {
        NativeArray::Traced(x) => x.requires_grad(),
        _ => false,
    }
}

#[test]
fn test_round_trip_preserves_values() {
    let _serial = serial();
    let handler = handler();
    let x = Array::with_dynamic_backend(NDArrayNumericTensor::from_vec(vec![1.5f32, -2.0, 3.25]), true);
    let fixed = Array::with_dynamic_backend(NDArrayNumericTensor::from_vec(vec![7i64]), false);

    handler.set_backend("traced", true).unwrap();
    assert!(matches!(x.data(), NativeArray::Traced(_)));
    assert!(matches!(fixed.data(), NativeArray::NDArray(_)));
    assert_eq!(x.dtype(), Some(omni_tensor::DType::F32));

    handler.set_backend("ndarray", true).unwrap();
    assert!(matches!(x.data(), NativeArray::NDArray(_)));
    assert_eq!(values(&handler, &x), vec![1.5, -2.0, 3.25]);
    assert_eq!(values(&handler, &fixed), vec![7.0]);
}

#[test]
fn test_variables_stay_variables() {
    let _serial = serial();
    let handler = handler();
    let w = Array::with_dynamic_backend(TracedTensor::variable(NDArrayNumericTensor::from_vec(vec![0.5f32, 1.0])), true);
    let c = Array::with_dynamic_backend(TracedTensor::new(NDArrayNumericTensor::from_vec(vec![2.0f32])), true);

    handler.set_backend("traced", true).unwrap();
    assert!(is_traced_variable(&w));
    assert!(!is_traced_variable(&c));
    assert_eq!(values(&handler, &w), vec![0.5, 1.0]);

    #[cfg(feature = "candle")]
    {
        handler.set_backend("candle", true).unwrap();
        assert!(matches!(w.data(), NativeArray::CandleVar(_)));
        assert!(matches!(c.data(), NativeArray::Candle(_)));
        assert_eq!(values(&handler, &w), vec![0.5, 1.0]);

        handler.set_backend("traced", true).unwrap();
        assert!(is_traced_variable(&w));
        assert!(!is_traced_variable(&c));
    }
}

#[test]
fn test_shared_leaves_convert_once() {
    let _serial = serial();
    let handler = handler();
    let x = Array::with_dynamic_backend(NDArrayNumericTensor::from_vec(vec![1.0f32]), true);
    let y = Array::with_dynamic_backend(NDArrayNumericTensor::from_vec(vec![2.0f32]), true);
    let outer = Container::with_dynamic_backend(
        omni_tensor::ContainerNode::Branch(
            [
                ("x".to_string(), omni_tensor::ContainerNode::Leaf(x.clone())),
                ("y".to_string(), omni_tensor::ContainerNode::Leaf(y.clone())),
            ]
            .into_iter()
            .collect(),
        ),
        true,
    );
    let twice = Container::with_dynamic_backend(
        omni_tensor::ContainerNode::Branch(
            [
                ("a".to_string(), omni_tensor::ContainerNode::Leaf(x.clone())),
                ("b".to_string(), omni_tensor::ContainerNode::Leaf(x.clone())),
            ]
            .into_iter()
            .collect(),
        ),
        true,
    );

    let exported = export_to_neutral(handler.registry()).unwrap();
    let ids: Vec<u64> = exported.objects().iter().map(|o| o.id()).collect();
    assert_eq!(ids, vec![outer.id(), twice.id()]);

    let traced = handler.registry().load("traced").unwrap();
    import_from_neutral(&exported, &traced).unwrap();
    for leaf in [&x, &y] {
        assert!(matches!(leaf.data(), NativeArray::Traced(_)));
    }
    assert_eq!(values(&handler, &twice.get("a").unwrap()), vec![1.0]);
    assert_eq!(values(&handler, &outer.get("y").unwrap()), vec![2.0]);
}

#[test]
fn test_container_is_variable_only_when_every_leaf_is() {
    let _serial = serial();
    let handler = handler();
    let var = |v: f32| Array::with_dynamic_backend(TracedTensor::variable(NDArrayNumericTensor::from_vec(vec![v])), false);
    let plain = |v: f32| Array::with_dynamic_backend(TracedTensor::new(NDArrayNumericTensor::from_vec(vec![v])), false);

    let params = Container::from_leaves([("w", var(1.0)), ("b", var(2.0))]);
    params.set_dynamic_backend(true);
    let mixed = Container::from_leaves([("w", var(3.0)), ("x", plain(4.0))]);
    mixed.set_dynamic_backend(true);
    let empty = Container::with_dynamic_backend(omni_tensor::ContainerNode::Branch(Default::default()), true);

    let exported = export_to_neutral(handler.registry()).unwrap();
    assert!(exported.is_variable(params.id()));
    assert!(!exported.is_variable(mixed.id()));
    assert!(!exported.is_variable(empty.id()));

    let traced = handler.registry().load("traced").unwrap();
    import_from_neutral(&exported, &traced).unwrap();
    assert!(params.leaves().iter().all(is_traced_variable));
    assert!(!mixed.leaves().iter().any(is_traced_variable));
}

#[test]
fn test_unrecognised_payload_aborts_before_switching() {
    let _serial = serial();
    let handler = handler();
    handler.set_backend("ndarray", false).unwrap();
    let good = Array::with_dynamic_backend(NDArrayNumericTensor::from_vec(vec![1.0f32]), true);
    let odd = Array::with_dynamic_backend(ForeignArray::new(5u8, vec![], None), true);

    let err = handler.set_backend("traced", true).unwrap_err();
    assert!(matches!(
        err,
        HandlerError::Conversion(ConversionError::UnrecognizedPayload(_))
    ));
    let stack: Vec<String> = handler.context().stack().iter().map(|b| b.name().to_string()).collect();
    assert_eq!(stack, vec!["ndarray"]);
    assert!(matches!(good.data(), NativeArray::NDArray(_)));
    assert!(matches!(odd.data(), NativeArray::Foreign(_)));

    odd.set_dynamic_backend(false);
    handler.set_backend("traced", true).unwrap();
    assert!(matches!(good.data(), NativeArray::Traced(_)));
}

/// Traced backend reporting a version string that does not parse.
struct Misversioned(TracedBackend);

impl BackendModule for Misversioned {
    fn name(&self) -> &str {
        "bad"
    }

    fn version(&self) -> &str {
        "one.two"
    }

    fn module_table(&self) -> &ModuleTable {
        self.0.module_table()
    }

    fn to_neutral(&self, payload: &NativeArray) -> Result<NDArrayNumericTensor, ConversionError> {
        self.0.to_neutral(payload)
    }

    fn from_neutral(&self, neutral: &NDArrayNumericTensor) -> Result<NativeArray, ConversionError> {
        self.0.from_neutral(neutral)
    }
}

#[test]
fn test_failed_load_leaves_objects_alone() {
    let _serial = serial();
    let registry = builtin_registry();
    registry
        .register("bad", "backends.bad", &[], || {
            Ok(Arc::new(Misversioned(TracedBackend::new())) as Arc<dyn BackendModule>)
        })
        .unwrap();
    let handler = BackendHandler::new(Arc::new(registry), HandlerConfig::default());
    handler.set_backend("traced", false).unwrap();
    let x = Array::with_dynamic_backend(TracedTensor::variable(NDArrayNumericTensor::from_vec(vec![0.25f32, 4.0])), true);

    let err = handler.set_backend("bad", true).unwrap_err();
    assert!(matches!(err, HandlerError::VersionParse(_)));
    let stack: Vec<String> = handler.context().stack().iter().map(|b| b.name().to_string()).collect();
    assert_eq!(stack, vec!["traced"]);
    assert!(is_traced_variable(&x));
    assert_eq!(values(&handler, &x), vec![0.25, 4.0]);

    handler.set_backend("ndarray", true).unwrap();
    assert!(matches!(x.data(), NativeArray::NDArray(_)));
}

#[test]
fn test_default_flag_applies_to_new_objects() {
    let _serial = serial();
    let previous = omni_tensor::dynamic_backend();
    omni_tensor::set_dynamic_backend(true);
    let x = Array::new(NDArrayNumericTensor::from_vec(vec![1.0f32]));
    omni_tensor::set_dynamic_backend(false);
    let y = Array::new(NDArrayNumericTensor::from_vec(vec![1.0f32]));
    omni_tensor::set_dynamic_backend(previous);
    assert!(x.dynamic_backend());
    assert!(!y.dynamic_backend());
}
