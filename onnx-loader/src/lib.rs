//! ONNX Runtime bindings loaded at runtime
//!
//! The runtime shared library is opened with `libloading` when the
//! [`Environment`] is first initialized; nothing links against it at build
//! time. On top of that this crate provides:
//!
//! - [`Tensor`]: a typed host buffer wrapped as a native value without copying
//! - [`InferenceSession`]: a model bound to fixed input/output tensors
//!
//! # Example
//!
//! ```no_run
//! use ortbind_onnx_loader::{Environment, InferenceSession, Tensor, Value};
//!
//! let env = Environment::global();
//! env.set_library_path("/opt/onnxruntime/lib/libonnxruntime.so")?;
//! env.initialize()?;
//! let runtime = env.runtime()?;
//!
//! let input = Tensor::new(&runtime, [1, 4], vec![1.0f32, 2.0, 3.0, 4.0])?;
//! let mut output = Tensor::<f32>::new_empty(&runtime, [1, 2])?;
//! let mut session = InferenceSession::create(
//!     &runtime,
//!     "model.onnx",
//!     &["input"],
//!     &["output"],
//!     &[&input],
//!     &[&output],
//!     None,
//! )?;
//! session.run(&[&input], &mut [&mut output])?;
//! println!("{:?}", output.data());
//!
//! session.destroy()?;
//! env.destroy()?;
//! # Ok::<(), ortbind_onnx_loader::OnnxError>(())
//! ```

pub mod environment;
pub mod error;
pub mod ffi;
pub mod library;
pub mod session;
pub mod tensor;
pub mod types;

pub use environment::{Environment, Runtime, UNINITIALIZED_VERSION};
pub use error::{OnnxError, Result};
pub use library::{default_library_file_name, resolve_library_path, LIBRARY_PATH_ENV};
pub use session::{InferenceSession, SessionOptions};
pub use tensor::{NativeHandle, Shape, Tensor, TensorElement, Value};
pub use types::{ErrorCode, GraphOptimizationLevel, LoggingLevel, TensorElementDataType, ValueType};
