//! FFI bindings for the ONNX Runtime C API
//!
//! The runtime exports a single symbol, `OrtGetApiBase`. Every other entry
//! point lives in the `OrtApi` function table it hands back, so instead of
//! resolving symbols by name we read typed function pointers at fixed slot
//! offsets of that table.

#![allow(non_camel_case_types)]

use crate::error::{OnnxError, Result};
use crate::types::ErrorCode;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};

// Opaque native types
#[repr(C)]
pub struct OrtEnv {
    _private: [u8; 0],
}

#[repr(C)]
pub struct OrtStatus {
    _private: [u8; 0],
}

#[repr(C)]
pub struct OrtMemoryInfo {
    _private: [u8; 0],
}

#[repr(C)]
pub struct OrtValue {
    _private: [u8; 0],
}

#[repr(C)]
pub struct OrtSession {
    _private: [u8; 0],
}

#[repr(C)]
pub struct OrtSessionOptions {
    _private: [u8; 0],
}

#[repr(C)]
pub struct OrtRunOptions {
    _private: [u8; 0],
}

/// Path character type expected by `CreateSession`
#[cfg(windows)]
pub type OrtChar = u16;
#[cfg(not(windows))]
pub type OrtChar = c_char;

/// Null means success; anything else must be released with `ReleaseStatus`.
pub type OrtStatusPtr = *mut OrtStatus;

/// `OrtApiBase`, returned by the exported `OrtGetApiBase`
#[repr(C)]
pub struct OrtApiBase {
    pub get_api: unsafe extern "system" fn(version: u32) -> *const c_void,
    pub get_version_string: unsafe extern "system" fn() -> *const c_char,
}

pub type OrtGetApiBaseFn = unsafe extern "system" fn() -> *const OrtApiBase;

pub const GET_API_BASE_SYMBOL: &[u8] = b"OrtGetApiBase\0";

// Function pointer types
pub type GetErrorCodeFn = unsafe extern "system" fn(status: *const OrtStatus) -> c_int;
pub type GetErrorMessageFn = unsafe extern "system" fn(status: *const OrtStatus) -> *const c_char;
pub type CreateEnvFn = unsafe extern "system" fn(
    log_severity_level: c_int,
    logid: *const c_char,
    out: *mut *mut OrtEnv,
) -> OrtStatusPtr;
pub type CreateSessionFn = unsafe extern "system" fn(
    env: *const OrtEnv,
    model_path: *const OrtChar,
    options: *const OrtSessionOptions,
    out: *mut *mut OrtSession,
) -> OrtStatusPtr;
pub type RunFn = unsafe extern "system" fn(
    session: *mut OrtSession,
    run_options: *const OrtRunOptions,
    input_names: *const *const c_char,
    inputs: *const *const OrtValue,
    input_len: usize,
    output_names: *const *const c_char,
    output_names_len: usize,
    outputs: *mut *mut OrtValue,
) -> OrtStatusPtr;
pub type CreateSessionOptionsFn =
    unsafe extern "system" fn(out: *mut *mut OrtSessionOptions) -> OrtStatusPtr;
pub type SetGraphOptimizationLevelFn =
    unsafe extern "system" fn(options: *mut OrtSessionOptions, level: c_int) -> OrtStatusPtr;
pub type SetNumThreadsFn =
    unsafe extern "system" fn(options: *mut OrtSessionOptions, threads: c_int) -> OrtStatusPtr;
pub type CreateTensorWithDataAsOrtValueFn = unsafe extern "system" fn(
    info: *const OrtMemoryInfo,
    p_data: *mut c_void,
    p_data_len: usize,
    shape: *const i64,
    shape_len: usize,
    element_type: c_int,
    out: *mut *mut OrtValue,
) -> OrtStatusPtr;
pub type CreateCpuMemoryInfoFn = unsafe extern "system" fn(
    allocator_type: c_int,
    mem_type: c_int,
    out: *mut *mut OrtMemoryInfo,
) -> OrtStatusPtr;
pub type ReleaseEnvFn = unsafe extern "system" fn(env: *mut OrtEnv);
pub type ReleaseStatusFn = unsafe extern "system" fn(status: *mut OrtStatus);
pub type ReleaseMemoryInfoFn = unsafe extern "system" fn(info: *mut OrtMemoryInfo);
pub type ReleaseSessionFn = unsafe extern "system" fn(session: *mut OrtSession);
pub type ReleaseValueFn = unsafe extern "system" fn(value: *mut OrtValue);
pub type ReleaseSessionOptionsFn = unsafe extern "system" fn(options: *mut OrtSessionOptions);

/// Slot offsets into `OrtApi` (API version 21, zero-based, pointer-sized slots)
mod slot {
    pub const GET_ERROR_CODE: usize = 1;
    pub const GET_ERROR_MESSAGE: usize = 2;
    pub const CREATE_ENV: usize = 3;
    pub const CREATE_SESSION: usize = 7;
    pub const RUN: usize = 9;
    pub const CREATE_SESSION_OPTIONS: usize = 10;
    pub const SET_SESSION_GRAPH_OPTIMIZATION_LEVEL: usize = 23;
    pub const SET_INTRA_OP_NUM_THREADS: usize = 24;
    pub const SET_INTER_OP_NUM_THREADS: usize = 25;
    pub const CREATE_TENSOR_WITH_DATA_AS_ORT_VALUE: usize = 49;
    pub const CREATE_CPU_MEMORY_INFO: usize = 69;
    pub const RELEASE_ENV: usize = 92;
    pub const RELEASE_STATUS: usize = 93;
    pub const RELEASE_MEMORY_INFO: usize = 94;
    pub const RELEASE_SESSION: usize = 95;
    pub const RELEASE_VALUE: usize = 96;
    pub const RELEASE_SESSION_OPTIONS: usize = 100;
}

/// The subset of `OrtApi` this crate calls
#[derive(Clone, Copy)]
pub struct OrtCallTable {
    pub get_error_code: GetErrorCodeFn,
    pub get_error_message: GetErrorMessageFn,
    pub create_env: CreateEnvFn,
    pub create_session: CreateSessionFn,
    pub run: RunFn,
    pub create_session_options: CreateSessionOptionsFn,
    pub set_session_graph_optimization_level: SetGraphOptimizationLevelFn,
    pub set_intra_op_num_threads: SetNumThreadsFn,
    pub set_inter_op_num_threads: SetNumThreadsFn,
    pub create_tensor_with_data_as_ort_value: CreateTensorWithDataAsOrtValueFn,
    pub create_cpu_memory_info: CreateCpuMemoryInfoFn,
    pub release_env: ReleaseEnvFn,
    pub release_status: ReleaseStatusFn,
    pub release_memory_info: ReleaseMemoryInfoFn,
    pub release_session: ReleaseSessionFn,
    pub release_value: ReleaseValueFn,
    pub release_session_options: ReleaseSessionOptionsFn,
}

impl OrtCallTable {
    /// Read every entry this crate uses out of an `OrtApi` table.
    ///
    /// # Safety
    ///
    /// `api` must be the non-null pointer returned by `OrtApiBase::get_api`
    /// for API version 21 or newer, and the owning library must stay loaded
    /// for as long as the table is used.
    pub unsafe fn from_api(api: *const c_void) -> Result<Self> {
        let table = api as *const *const c_void;
        Ok(Self {
            get_error_code: entry(table, slot::GET_ERROR_CODE, "GetErrorCode")?,
            get_error_message: entry(table, slot::GET_ERROR_MESSAGE, "GetErrorMessage")?,
            create_env: entry(table, slot::CREATE_ENV, "CreateEnv")?,
            create_session: entry(table, slot::CREATE_SESSION, "CreateSession")?,
            run: entry(table, slot::RUN, "Run")?,
            create_session_options: entry(
                table,
                slot::CREATE_SESSION_OPTIONS,
                "CreateSessionOptions",
            )?,
            set_session_graph_optimization_level: entry(
                table,
                slot::SET_SESSION_GRAPH_OPTIMIZATION_LEVEL,
                "SetSessionGraphOptimizationLevel",
            )?,
            set_intra_op_num_threads: entry(
                table,
                slot::SET_INTRA_OP_NUM_THREADS,
                "SetIntraOpNumThreads",
            )?,
            set_inter_op_num_threads: entry(
                table,
                slot::SET_INTER_OP_NUM_THREADS,
                "SetInterOpNumThreads",
            )?,
            create_tensor_with_data_as_ort_value: entry(
                table,
                slot::CREATE_TENSOR_WITH_DATA_AS_ORT_VALUE,
                "CreateTensorWithDataAsOrtValue",
            )?,
            create_cpu_memory_info: entry(
                table,
                slot::CREATE_CPU_MEMORY_INFO,
                "CreateCpuMemoryInfo",
            )?,
            release_env: entry(table, slot::RELEASE_ENV, "ReleaseEnv")?,
            release_status: entry(table, slot::RELEASE_STATUS, "ReleaseStatus")?,
            release_memory_info: entry(table, slot::RELEASE_MEMORY_INFO, "ReleaseMemoryInfo")?,
            release_session: entry(table, slot::RELEASE_SESSION, "ReleaseSession")?,
            release_value: entry(table, slot::RELEASE_VALUE, "ReleaseValue")?,
            release_session_options: entry(
                table,
                slot::RELEASE_SESSION_OPTIONS,
                "ReleaseSessionOptions",
            )?,
        })
    }

    /// Turn a returned status into a `Result`, releasing the status.
    ///
    /// # Safety
    ///
    /// `status` must be null or a status freshly returned by this table.
    pub unsafe fn check(&self, status: OrtStatusPtr, context: &str) -> Result<()> {
        if status.is_null() {
            return Ok(());
        }
        let code = ErrorCode::from((self.get_error_code)(status));
        let message = c_str_to_string((self.get_error_message)(status));
        (self.release_status)(status);
        Err(OnnxError::Native {
            context: context.to_string(),
            code,
            message,
        })
    }
}

/// Read one function pointer out of the table.
unsafe fn entry<F: Copy>(table: *const *const c_void, index: usize, name: &'static str) -> Result<F> {
    debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*const c_void>());
    let raw = *table.add(index);
    if raw.is_null() {
        return Err(OnnxError::SymbolNotFound {
            name,
            reason: format!("OrtApi slot {} is null", index),
        });
    }
    Ok(std::mem::transmute_copy::<*const c_void, F>(&raw))
}

/// Copy a borrowed C string into an owned `String` (null becomes empty).
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string valid for the call.
pub unsafe fn c_str_to_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}
