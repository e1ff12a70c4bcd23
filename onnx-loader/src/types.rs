//! Enumerations shared with the ONNX Runtime C API
//!
//! Discriminants match the C enums exactly; they are passed across the FFI
//! boundary as `c_int`.

use serde::{Deserialize, Serialize};
use std::os::raw::c_int;

/// ONNX Runtime API version the call table is resolved against.
///
/// `GetApi` returns null when the loaded library is older than this.
pub const ORT_API_VERSION: u32 = 21;

/// Native environment logging severity (`OrtLoggingLevel`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Verbose = 0,
    Info = 1,
    #[default]
    Warning = 2,
    Error = 3,
    Fatal = 4,
}

impl LoggingLevel {
    pub(crate) fn as_raw(self) -> c_int {
        self as c_int
    }
}

/// Native status codes (`OrtErrorCode`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Ok,
    Fail,
    InvalidArgument,
    NoSuchFile,
    NoModel,
    EngineError,
    RuntimeException,
    InvalidProtobuf,
    ModelLoaded,
    NotImplemented,
    InvalidGraph,
    EpFail,
    ModelLoadCanceled,
    ModelRequiresCompilation,
    Unknown(i32),
}

impl From<c_int> for ErrorCode {
    fn from(raw: c_int) -> Self {
        match raw {
            0 => Self::Ok,
            1 => Self::Fail,
            2 => Self::InvalidArgument,
            3 => Self::NoSuchFile,
            4 => Self::NoModel,
            5 => Self::EngineError,
            6 => Self::RuntimeException,
            7 => Self::InvalidProtobuf,
            8 => Self::ModelLoaded,
            9 => Self::NotImplemented,
            10 => Self::InvalidGraph,
            11 => Self::EpFail,
            12 => Self::ModelLoadCanceled,
            13 => Self::ModelRequiresCompilation,
            other => Self::Unknown(other),
        }
    }
}

/// Tensor element types (`ONNXTensorElementDataType`)
///
/// Only the fixed-width numeric types are listed; string tensors are not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorElementDataType {
    Float = 1,
    Uint8 = 2,
    Int8 = 3,
    Uint16 = 4,
    Int16 = 5,
    Int32 = 6,
    Int64 = 7,
    Bool = 9,
    Double = 11,
    Uint32 = 12,
    Uint64 = 13,
}

impl TensorElementDataType {
    pub(crate) fn as_raw(self) -> c_int {
        self as c_int
    }
}

/// Kind of value held behind a native handle (`ONNXType`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Tensor,
}

/// Graph optimization level (`GraphOptimizationLevel`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphOptimizationLevel {
    Disable,
    Basic,
    Extended,
    #[default]
    All,
}

impl GraphOptimizationLevel {
    pub(crate) fn as_raw(self) -> c_int {
        match self {
            Self::Disable => 0,
            Self::Basic => 1,
            Self::Extended => 2,
            Self::All => 99,
        }
    }
}

/// `OrtAllocatorType::OrtArenaAllocator`
pub(crate) const ALLOCATOR_TYPE_ARENA: c_int = 1;
/// `OrtMemType::OrtMemTypeDefault`
pub(crate) const MEM_TYPE_DEFAULT: c_int = 0;
