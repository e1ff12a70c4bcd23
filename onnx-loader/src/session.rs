//! Inference sessions bound to pre-allocated tensors

use crate::environment::Runtime;
use crate::error::{OnnxError, Result};
use crate::ffi::{OrtChar, OrtSession, OrtSessionOptions, OrtValue};
use crate::tensor::{NativeHandle, Value};
use crate::types::GraphOptimizationLevel;
use serde::{Deserialize, Serialize};
use std::ffi::CString;
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::Arc;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Graph optimization level
    pub optimization_level: GraphOptimizationLevel,

    /// Intra-op thread count (0 = runtime default)
    pub intra_op_threads: u16,

    /// Inter-op thread count (0 = runtime default)
    pub inter_op_threads: u16,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            optimization_level: GraphOptimizationLevel::All,
            intra_op_threads: 0,
            inter_op_threads: 0,
        }
    }
}

impl SessionOptions {
    pub fn with_optimization_level(mut self, level: GraphOptimizationLevel) -> Self {
        self.optimization_level = level;
        self
    }

    pub fn with_intra_threads(mut self, threads: u16) -> Self {
        self.intra_op_threads = threads;
        self
    }

    pub fn with_inter_threads(mut self, threads: u16) -> Self {
        self.inter_op_threads = threads;
        self
    }
}

/// Native session options, released on drop.
struct NativeSessionOptions<'a> {
    ptr: NonNull<OrtSessionOptions>,
    runtime: &'a Runtime,
}

impl<'a> NativeSessionOptions<'a> {
    fn build(runtime: &'a Runtime, options: &SessionOptions) -> Result<Self> {
        let api = runtime.api();
        let mut raw: *mut OrtSessionOptions = ptr::null_mut();
        // SAFETY: `raw` is a valid out-pointer; the status is checked.
        unsafe {
            api.check((api.create_session_options)(&mut raw), "CreateSessionOptions")?;
        }
        let ptr = NonNull::new(raw).ok_or_else(|| {
            OnnxError::InvalidInput("CreateSessionOptions returned null".to_string())
        })?;
        let native = Self { ptr, runtime };

        // SAFETY: native.ptr is a live options object owned by `native`,
        // which releases it on any early return.
        unsafe {
            api.check(
                (api.set_session_graph_optimization_level)(
                    native.ptr.as_ptr(),
                    options.optimization_level.as_raw(),
                ),
                "SetSessionGraphOptimizationLevel",
            )?;
            if options.intra_op_threads > 0 {
                api.check(
                    (api.set_intra_op_num_threads)(
                        native.ptr.as_ptr(),
                        c_int::from(options.intra_op_threads),
                    ),
                    "SetIntraOpNumThreads",
                )?;
            }
            if options.inter_op_threads > 0 {
                api.check(
                    (api.set_inter_op_num_threads)(
                        native.ptr.as_ptr(),
                        c_int::from(options.inter_op_threads),
                    ),
                    "SetInterOpNumThreads",
                )?;
            }
        }
        Ok(native)
    }
}

impl Drop for NativeSessionOptions<'_> {
    fn drop(&mut self) {
        // SAFETY: created by CreateSessionOptions and released only here.
        unsafe { (self.runtime.api().release_session_options)(self.ptr.as_ptr()) }
    }
}

/// A loaded model bound to fixed input and output tensors
///
/// The session does not own its tensors. Each `run` must be handed the same
/// values it was created with; outputs are borrowed mutably for the
/// duration of the native call.
pub struct InferenceSession {
    handle: Option<NonNull<OrtSession>>,
    input_names: Vec<CString>,
    output_names: Vec<CString>,
    input_handles: Vec<NativeHandle>,
    output_handles: Vec<NativeHandle>,
    model_path: PathBuf,
    runtime: Arc<Runtime>,
}

impl InferenceSession {
    /// Load `model_path` and bind the named inputs and outputs.
    ///
    /// Uses default [`SessionOptions`] when `options` is `None`.
    pub fn create<S: AsRef<str>>(
        runtime: &Arc<Runtime>,
        model_path: impl AsRef<Path>,
        input_names: &[S],
        output_names: &[S],
        inputs: &[&dyn Value],
        outputs: &[&dyn Value],
        options: Option<&SessionOptions>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        if model_path.as_os_str().is_empty() {
            return Err(OnnxError::InvalidInput("model path is empty".to_string()));
        }
        if !model_path.exists() {
            return Err(OnnxError::ModelNotFound(model_path.display().to_string()));
        }
        if input_names.is_empty() || output_names.is_empty() {
            return Err(OnnxError::InvalidInput(
                "session needs at least one input and one output".to_string(),
            ));
        }
        if input_names.len() != inputs.len() {
            return Err(OnnxError::InvalidInput(format!(
                "{} input names but {} input values",
                input_names.len(),
                inputs.len()
            )));
        }
        if output_names.len() != outputs.len() {
            return Err(OnnxError::InvalidInput(format!(
                "{} output names but {} output values",
                output_names.len(),
                outputs.len()
            )));
        }

        let input_handles = live_handles(inputs, "input")?;
        let output_handles = live_handles(outputs, "output")?;
        let input_names = to_c_strings(input_names)?;
        let output_names = to_c_strings(output_names)?;

        let defaults = SessionOptions::default();
        let native_options = NativeSessionOptions::build(runtime, options.unwrap_or(&defaults))?;
        let native_path = model_path_to_native(model_path)?;

        let api = runtime.api();
        let mut session: *mut OrtSession = ptr::null_mut();
        // SAFETY: env, path and options are valid for the call and `session`
        // is a valid out-pointer. The runtime copies the options.
        unsafe {
            api.check(
                (api.create_session)(
                    runtime.env_ptr(),
                    native_path.as_ptr(),
                    native_options.ptr.as_ptr(),
                    &mut session,
                ),
                "CreateSession",
            )?;
        }
        drop(native_options);

        let handle = NonNull::new(session).ok_or_else(|| {
            OnnxError::InvalidInput("CreateSession returned a null session".to_string())
        })?;

        log::debug!("Created session for {}", model_path.display());

        Ok(Self {
            handle: Some(handle),
            input_names,
            output_names,
            input_handles,
            output_handles,
            model_path: model_path.to_path_buf(),
            runtime: Arc::clone(runtime),
        })
    }

    /// Run inference synchronously.
    ///
    /// `inputs` and `outputs` must be the values bound at creation, in the
    /// same order. Results are written into the output tensors' buffers.
    pub fn run(&mut self, inputs: &[&dyn Value], outputs: &mut [&mut dyn Value]) -> Result<()> {
        let session = self.handle.ok_or(OnnxError::Destroyed("session"))?;
        if self.input_names.len() != self.input_handles.len()
            || self.output_names.len() != self.output_handles.len()
        {
            return Err(OnnxError::InvalidInput(
                "session name and value lists are out of sync".to_string(),
            ));
        }
        check_bound(inputs.iter().map(|v| v.native_handle()), &self.input_handles, "input")?;
        check_bound(outputs.iter().map(|v| v.native_handle()), &self.output_handles, "output")?;

        let input_names: Vec<*const c_char> = self.input_names.iter().map(|n| n.as_ptr()).collect();
        let output_names: Vec<*const c_char> =
            self.output_names.iter().map(|n| n.as_ptr()).collect();
        let input_values: Vec<*const OrtValue> = self
            .input_handles
            .iter()
            .map(|h| h.as_ptr() as *const OrtValue)
            .collect();
        let mut output_values: Vec<*mut OrtValue> =
            self.output_handles.iter().map(|h| h.as_ptr()).collect();

        let api = self.runtime.api();
        // SAFETY: every handle was checked to be the live value passed in by
        // the caller, whose borrows keep the backing buffers in place for the
        // duration of this call. Name arrays outlive the call.
        unsafe {
            api.check(
                (api.run)(
                    session.as_ptr(),
                    ptr::null(),
                    input_names.as_ptr(),
                    input_values.as_ptr(),
                    input_values.len(),
                    output_names.as_ptr(),
                    output_names.len(),
                    output_values.as_mut_ptr(),
                ),
                "Run",
            )
        }
    }

    /// Release the native session. Idempotent; bound tensors are untouched.
    pub fn destroy(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            // SAFETY: created by CreateSession and taken out of `self.handle`,
            // so it is released exactly once.
            unsafe { (self.runtime.api().release_session)(handle.as_ptr()) }
            log::debug!("Destroyed session for {}", self.model_path.display());
        }
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.handle.is_none()
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn input_names(&self) -> Vec<String> {
        self.input_names
            .iter()
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.output_names
            .iter()
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }
}

impl Drop for InferenceSession {
    fn drop(&mut self) {
        if self.handle.is_some() {
            log::debug!("Session for {} released on drop", self.model_path.display());
            let _ = self.destroy();
        }
    }
}

impl std::fmt::Debug for InferenceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceSession")
            .field("model_path", &self.model_path)
            .field("inputs", &self.input_names)
            .field("outputs", &self.output_names)
            .field("live", &self.handle.is_some())
            .finish()
    }
}

// SAFETY: the session is only run through &mut self, and OrtSession has no
// thread affinity.
unsafe impl Send for InferenceSession {}

fn live_handles(values: &[&dyn Value], side: &str) -> Result<Vec<NativeHandle>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.native_handle().ok_or_else(|| {
                OnnxError::InvalidInput(format!("{} value {} has been destroyed", side, i))
            })
        })
        .collect()
}

fn check_bound(
    given: impl ExactSizeIterator<Item = Option<NativeHandle>>,
    bound: &[NativeHandle],
    side: &str,
) -> Result<()> {
    if given.len() != bound.len() {
        return Err(OnnxError::InvalidInput(format!(
            "expected {} {} values, got {}",
            bound.len(),
            side,
            given.len()
        )));
    }
    for (i, (handle, expected)) in given.zip(bound).enumerate() {
        if handle != Some(*expected) {
            return Err(OnnxError::InvalidInput(format!(
                "{} value {} is not the value bound at session creation",
                side, i
            )));
        }
    }
    Ok(())
}

fn to_c_strings<S: AsRef<str>>(names: &[S]) -> Result<Vec<CString>> {
    names
        .iter()
        .map(|name| {
            let name = name.as_ref();
            if name.is_empty() {
                return Err(OnnxError::InvalidInput("empty tensor name".to_string()));
            }
            CString::new(name)
                .map_err(|_| OnnxError::InvalidInput(format!("tensor name {:?} contains NUL", name)))
        })
        .collect()
}

#[cfg(windows)]
fn model_path_to_native(path: &Path) -> Result<Vec<OrtChar>> {
    use std::os::windows::ffi::OsStrExt;
    let mut wide: Vec<u16> = path.as_os_str().encode_wide().collect();
    if wide.contains(&0) {
        return Err(OnnxError::InvalidInput(format!(
            "model path {} contains NUL",
            path.display()
        )));
    }
    wide.push(0);
    Ok(wide)
}

#[cfg(unix)]
fn model_path_to_native(path: &Path) -> Result<Vec<OrtChar>> {
    use std::os::unix::ffi::OsStrExt;
    nul_terminated(path, path.as_os_str().as_bytes())
}

#[cfg(not(any(unix, windows)))]
fn model_path_to_native(path: &Path) -> Result<Vec<OrtChar>> {
    let utf8 = path.to_str().ok_or_else(|| {
        OnnxError::InvalidInput(format!("model path {} is not valid UTF-8", path.display()))
    })?;
    nul_terminated(path, utf8.as_bytes())
}

#[cfg(not(windows))]
fn nul_terminated(path: &Path, bytes: &[u8]) -> Result<Vec<OrtChar>> {
    let c_path = CString::new(bytes).map_err(|_| {
        OnnxError::InvalidInput(format!("model path {} contains NUL", path.display()))
    })?;
    Ok(c_path
        .as_bytes_with_nul()
        .iter()
        .map(|&b| b as OrtChar)
        .collect())
}
