//! Backend-switching array runtime.
//!
//! Library code is written once against the [`functional`] namespace and
//! runs on whichever backend is active: the one on top of the backend stack,
//! else the one owning the arguments' native arrays, else the implicit
//! default. Tracked [`Array`]s and [`Container`]s that opt in follow the
//! active backend across switches.

pub mod array;
pub mod backends;
pub mod config;
pub mod container;
pub mod dtype;
pub mod functional;
pub mod handler;
pub mod native_array;
pub mod tracking;
pub mod value;

pub use array::Array;
pub use config::HandlerConfig;
pub use container::{Container, ContainerNode};
pub use dtype::DType;
pub use handler::{
    BackendGuard, BackendHandler, HandlerError, IsolatedBackend, call, choose_random_backend, clear_backend_stack,
    current_backend, dynamic_backend, get_backend, handler, set_backend, set_dynamic_backend, unset_backend,
    using_backend, with_backend,
};
pub use native_array::NativeArray;
pub use value::{Args, Value};
