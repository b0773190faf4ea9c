//! The library's own namespace. Every backend is bound against this table:
//! primitives here forward to the dispatch backend, the rest are written in
//! terms of other functions of the namespace they are called through.

mod helpers;

use strum::IntoEnumIterator;

pub use helpers::*;

use crate::args;
use crate::backends::ndarray_backend::reject_axis;
use crate::dtype::DType;
use crate::handler::function::{FunctionError, ModuleTable};
use crate::handler::namespace::{FUNCTIONAL_ROOT, Namespace};
use crate::value::{Args, Value};

const PRIMITIVES: [&str; 16] = [
    "asarray",
    "zeros",
    "ones",
    "add",
    "subtract",
    "multiply",
    "divide",
    "negative",
    "abs",
    "exp",
    "sqrt",
    "sum",
    "astype",
    "shape",
    "dtype",
    "stop_gradient",
];

fn primitive(table: ModuleTable, path: &'static str) -> ModuleTable {
    let name = path.rsplit('.').next().unwrap_or(path);
    table.function(name, move |ns, args| ns.call_primitive(path, args))
}

fn first(args: &Args, function: &str) -> Result<Value, FunctionError> {
    Ok(args.require(0, "x", function)?.clone())
}

fn num_elements(ns: &Namespace, x: &Value) -> Result<usize, FunctionError> {
    match ns.call("shape", &args![x.clone()])? {
        Value::Shape(shape) => Ok(shape.iter().product()),
        other => Err(FunctionError::invalid_argument("shape", "return", "shape", &other)),
    }
}

fn composed_mean(ns: &Namespace, args: &Args) -> Result<Value, FunctionError> {
    let backend = ns.dispatch_backend(args)?;
    if backend.table().lookup_function("mean").is_some() {
        return ns.call_primitive("mean", args);
    }
    reject_axis(args, "mean")?;
    let x = first(args, "mean")?;
    let total = ns.call("sum", &args![x.clone()])?;
    let n = num_elements(ns, &x)?;
    ns.call("divide", &args![total, n as f64])
}

fn composed_var(ns: &Namespace, args: &Args) -> Result<Value, FunctionError> {
    reject_axis(args, "var")?;
    let x = first(args, "var")?;
    let centered = ns.call("subtract", &args![x.clone(), ns.call("mean", &args![x])?])?;
    ns.call("mean", &args![ns.call("square", &args![centered])?])
}

fn linalg_table() -> ModuleTable {
    let table = ModuleTable::new("functional.linalg");
    let table = primitive(table, "linalg.matmul");
    primitive(table, "linalg.matrix_transpose")
        .function("vector_norm", |ns, args| {
            let x = first(args, "vector_norm")?;
            let squared = ns.call("square", &args![x])?;
            ns.call("sqrt", &args![ns.call("sum", &args![squared])?])
        })
        .function("vecdot", |ns, args| {
            let a = args.require(0, "x1", "vecdot")?.clone();
            let b = args.require(1, "x2", "vecdot")?.clone();
            ns.call("sum", &args![ns.call("multiply", &args![a, b])?])
        })
}

fn layers_table() -> ModuleTable {
    ModuleTable::new("functional.layers").function("linear", |ns, args| {
        let x = args.require(0, "x", "linear")?.clone();
        let weight = args.require(1, "weight", "linear")?.clone();
        let wt = ns.call("linalg.matrix_transpose", &args![weight])?;
        let y = ns.call("linalg.matmul", &args![x, wt])?;
        match args.arg(2, "bias") {
            Some(bias) => ns.call("add", &args![y, bias.clone()]),
            None => Ok(y),
        }
    })
}

fn random_table() -> ModuleTable {
    let table = ModuleTable::new("functional.random");
    let table = primitive(table, "random.random_uniform");
    primitive(table, "random.seed")
}

/// Helpers outside the functional tree; never rebound to a backend.
fn utils_table() -> ModuleTable {
    ModuleTable::new("utils")
        .function("native_type_name", |_, args| {
            let v = args.require(0, "x", "native_type_name")?;
            let native = v
                .as_native()
                .ok_or_else(|| FunctionError::invalid_argument("native_type_name", "x", "array", v))?;
            Ok(Value::Str(native.type_name().to_string()))
        })
        .function("dispatch_backend", |ns, args| {
            Ok(Value::Str(ns.dispatch_backend(args)?.name().to_string()))
        })
}

/// The library namespace that backends are bound against.
pub fn library_table() -> ModuleTable {
    let mut table = ModuleTable::new(FUNCTIONAL_ROOT);
    for dtype in DType::iter() {
        table = table.constant(&dtype.to_string(), Value::DType(dtype));
    }
    for name in PRIMITIVES {
        table = primitive(table, name);
    }
    table
        .function("mean", composed_mean)
        .function("square", |ns, args| {
            let x = first(args, "square")?;
            ns.call("multiply", &args![x.clone(), x])
        })
        .function("var", composed_var)
        .function("std", |ns, args| ns.call("sqrt", &args![composed_var(ns, args)?]))
        .module("linalg", linalg_table())
        .module("layers", layers_table())
        .module("random", random_table())
        .module("utils", utils_table())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_layout() {
        let table = library_table();
        assert_eq!(table.location(), "functional");
        assert!(table.lookup_function("linalg.matmul").is_some());
        assert!(table.lookup_function("random.seed").is_some());
        assert!(table.lookup("float32").is_some());
        match table.get("utils") {
            Some(crate::handler::function::ModuleEntry::Module(m)) => assert_eq!(m.location(), "utils"),
            other => panic!("unexpected utils entry {other:?}"),
        }
    }
}
