//! Process-wide ONNX Runtime environment
//!
//! The environment is reference counted. The first `initialize` loads the
//! shared library, resolves the call table and creates the native
//! environment; the matching last `destroy` releases it. Anything created
//! from the runtime (tensors, sessions) holds an `Arc<Runtime>`, so the
//! library and native environment stay alive until the last of those is gone.

use crate::error::{OnnxError, Result};
use crate::ffi::{
    c_str_to_string, OrtCallTable, OrtEnv, OrtGetApiBaseFn, GET_API_BASE_SYMBOL,
};
use crate::library::{self, parse_minor_version, resolve_library_path};
use crate::types::{LoggingLevel, ORT_API_VERSION};
use libloading::Library;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::{Arc, OnceLock};

/// Version string reported while no runtime is loaded.
pub const UNINITIALIZED_VERSION: &str = "0.0.0-dev";

/// Identifier the native environment logs under.
const LOG_ID: &std::ffi::CStr = c"ortbind";

/// A loaded runtime: library, call table and native environment.
pub struct Runtime {
    api: OrtCallTable,
    env: NonNull<OrtEnv>,
    version: String,
    library_path: PathBuf,
    // Dropped last: every function pointer above points into it.
    _library: Library,
}

impl Runtime {
    fn load(path: &Path, log_level: LoggingLevel) -> Result<Self> {
        let library = open_library(path)?;

        // SAFETY: OrtGetApiBase takes no arguments and returns a pointer to a
        // static struct inside the library, which `library` keeps loaded.
        let base = unsafe {
            let get_api_base = library
                .get::<OrtGetApiBaseFn>(GET_API_BASE_SYMBOL)
                .map_err(|e| OnnxError::SymbolNotFound {
                    name: "OrtGetApiBase",
                    reason: e.to_string(),
                })?;
            get_api_base()
        };
        if base.is_null() {
            return Err(OnnxError::LibraryLoadFailed(
                "OrtGetApiBase returned null".to_string(),
            ));
        }

        // SAFETY: base is non-null and points at the library's OrtApiBase.
        let version = unsafe { c_str_to_string(((*base).get_version_string)()) };
        check_version(&version);

        // SAFETY: GetApi returns null for unsupported versions, checked below.
        let api_ptr = unsafe { ((*base).get_api)(ORT_API_VERSION) };
        if api_ptr.is_null() {
            return Err(OnnxError::LibraryLoadFailed(format!(
                "runtime {} does not provide API version {}",
                version, ORT_API_VERSION
            )));
        }

        // SAFETY: api_ptr is the OrtApi table for ORT_API_VERSION and stays
        // valid while `library` is loaded.
        let api = unsafe { OrtCallTable::from_api(api_ptr)? };

        let mut env: *mut OrtEnv = ptr::null_mut();
        // SAFETY: LOG_ID is NUL-terminated and `env` is a valid out-pointer.
        unsafe {
            api.check(
                (api.create_env)(log_level.as_raw(), LOG_ID.as_ptr(), &mut env),
                "CreateEnv",
            )?;
        }
        let env = NonNull::new(env).ok_or_else(|| {
            OnnxError::LibraryLoadFailed("CreateEnv returned a null environment".to_string())
        })?;

        log::info!(
            "Loaded ONNX Runtime {} from {}",
            version,
            path.display()
        );

        Ok(Self {
            api,
            env,
            version,
            library_path: path.to_path_buf(),
            _library: library,
        })
    }

    /// Runtime version string, e.g. `1.21.0`.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    pub(crate) fn api(&self) -> &OrtCallTable {
        &self.api
    }

    pub(crate) fn env_ptr(&self) -> *const OrtEnv {
        self.env.as_ptr()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // SAFETY: env was created by CreateEnv and is released exactly once,
        // here. No tensor or session outlives this Runtime because they each
        // hold an Arc to it.
        unsafe {
            (self.api.release_env)(self.env.as_ptr());
        }
        log::debug!("Released ONNX Runtime environment");
    }
}

// SAFETY: OrtEnv is documented as thread-safe and the call table is immutable
// after load, so a Runtime can be shared and sent between threads.
unsafe impl Send for Runtime {}
unsafe impl Sync for Runtime {}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("version", &self.version)
            .field("library_path", &self.library_path)
            .finish()
    }
}

fn open_library(path: &Path) -> Result<Library> {
    // SAFETY: loading a shared library runs its initializers. The path was
    // validated to be a regular file and the library is only accessed
    // through the typed entry points resolved from OrtGetApiBase.
    #[cfg(unix)]
    let library = unsafe {
        use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};
        UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL).map(Library::from)
    };
    #[cfg(not(unix))]
    let library = unsafe { Library::new(path) };

    library.map_err(|e| {
        OnnxError::LibraryLoadFailed(format!("Failed to load {}: {}", path.display(), e))
    })
}

fn check_version(version: &str) {
    if library::version_check_disabled() {
        return;
    }
    match parse_minor_version(version) {
        Some(minor) if minor >= ORT_API_VERSION => {}
        Some(_) => log::warn!(
            "ONNX Runtime {} is older than 1.{}; some entry points may be missing",
            version,
            ORT_API_VERSION
        ),
        None => log::warn!("Could not parse ONNX Runtime version {:?}", version),
    }
}

struct EnvironmentState {
    ref_count: usize,
    library_path: Option<PathBuf>,
    log_level: LoggingLevel,
    runtime: Option<Arc<Runtime>>,
}

/// Reference-counted owner of the loaded runtime
///
/// Use [`Environment::global`] for the process-wide instance, or
/// [`Environment::new`] for an isolated one (tests).
pub struct Environment {
    state: Mutex<EnvironmentState>,
}

static GLOBAL: OnceLock<Arc<Environment>> = OnceLock::new();

impl Environment {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EnvironmentState {
                ref_count: 0,
                library_path: None,
                log_level: LoggingLevel::default(),
                runtime: None,
            }),
        }
    }

    /// The process-wide environment, created on first use.
    pub fn global() -> Arc<Environment> {
        GLOBAL.get_or_init(|| Arc::new(Environment::new())).clone()
    }

    /// Record the shared library path used by the next `initialize`.
    ///
    /// Fails if the environment is already initialized from a different path.
    pub fn set_library_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut state = self.state.lock();
        if state.ref_count > 0 {
            if state.library_path.as_deref() == Some(path) {
                return Ok(());
            }
            return Err(OnnxError::AlreadyInitialized("library path"));
        }
        state.library_path = Some(path.to_path_buf());
        Ok(())
    }

    pub fn library_path(&self) -> Option<PathBuf> {
        self.state.lock().library_path.clone()
    }

    /// Set the native log level used when the environment is created.
    pub fn set_log_level(&self, level: LoggingLevel) -> Result<()> {
        let mut state = self.state.lock();
        if state.ref_count > 0 {
            if state.log_level == level {
                return Ok(());
            }
            return Err(OnnxError::AlreadyInitialized("log level"));
        }
        state.log_level = level;
        Ok(())
    }

    pub fn log_level(&self) -> LoggingLevel {
        self.state.lock().log_level
    }

    /// Take a reference; the first one loads the runtime.
    ///
    /// The library comes from [`set_library_path`](Self::set_library_path),
    /// or from `ONNXRUNTIME_LIB_PATH` when no path was set. On failure the
    /// count stays where it was.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.ref_count > 0 {
            state.ref_count += 1;
            return Ok(());
        }
        let path = resolve_library_path(state.library_path.as_deref())?;
        let runtime = Runtime::load(&path, state.log_level)?;
        state.runtime = Some(Arc::new(runtime));
        state.ref_count = 1;
        Ok(())
    }

    /// Drop a reference. No-op when not initialized.
    ///
    /// The last reference detaches the runtime from the environment, so
    /// `runtime()` fails and the next `initialize` loads afresh. The native
    /// environment and library are released once every tensor and session
    /// still holding the `Arc<Runtime>` has been dropped, so values created
    /// before `destroy` stay valid until their owners release them.
    pub fn destroy(&self) -> Result<()> {
        let mut state = self.state.lock();
        match state.ref_count {
            0 => {}
            1 => {
                state.ref_count = 0;
                if let Some(runtime) = state.runtime.take() {
                    if Arc::strong_count(&runtime) > 1 {
                        log::debug!(
                            "Environment destroyed with {} live runtime references",
                            Arc::strong_count(&runtime) - 1
                        );
                    }
                }
            }
            _ => state.ref_count -= 1,
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().ref_count > 0
    }

    pub fn ref_count(&self) -> usize {
        self.state.lock().ref_count
    }

    /// Shared handle to the loaded runtime.
    pub fn runtime(&self) -> Result<Arc<Runtime>> {
        self.state
            .lock()
            .runtime
            .clone()
            .ok_or(OnnxError::NotInitialized)
    }

    /// Loaded runtime version, or `0.0.0-dev` when not initialized.
    pub fn version(&self) -> String {
        match &self.state.lock().runtime {
            Some(runtime) => runtime.version().to_string(),
            None => UNINITIALIZED_VERSION.to_string(),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Environment")
            .field("ref_count", &state.ref_count)
            .field("library_path", &state.library_path)
            .field("log_level", &state.log_level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_failed_initialize_rolls_back() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join(library::default_library_file_name());
        std::fs::write(&bogus, b"not a shared library").unwrap();

        let env = Environment::new();
        env.set_library_path(&bogus).unwrap();
        assert!(env.initialize().is_err());
        assert_eq!(env.ref_count(), 0);
        assert!(env.runtime().is_err());
    }

    #[test]
    fn test_destroy_when_not_initialized_is_noop() {
        let env = Environment::new();
        env.destroy().unwrap();
        env.destroy().unwrap();
        assert_eq!(env.ref_count(), 0);
    }

    #[test]
    fn test_version_when_not_initialized() {
        let env = Environment::new();
        assert_eq!(env.version(), UNINITIALIZED_VERSION);
    }

    #[test]
    fn test_runtime_requires_initialize() {
        let env = Environment::new();
        assert!(matches!(env.runtime(), Err(OnnxError::NotInitialized)));
    }

    #[test]
    fn test_set_library_path_locked_after_initialize() {
        let env = Environment::new();
        env.set_library_path("/opt/ort/libonnxruntime.so").unwrap();
        env.state.lock().ref_count = 1;

        env.set_library_path("/opt/ort/libonnxruntime.so").unwrap();
        let result = env.set_library_path("/somewhere/else.so");
        assert!(matches!(result, Err(OnnxError::AlreadyInitialized(_))));
        assert!(matches!(
            env.set_log_level(LoggingLevel::Verbose),
            Err(OnnxError::AlreadyInitialized(_))
        ));
        env.set_log_level(LoggingLevel::Warning).unwrap();

        env.state.lock().ref_count = 0;
    }

    #[test]
    fn test_concurrent_initialize_destroy_balances() {
        const THREADS: usize = 32;

        let env = Arc::new(Environment::new());
        // Stand in for one prior successful initialize so the threads only
        // exercise the counting path.
        env.state.lock().ref_count = 1;
        let start = env.ref_count();

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let env = Arc::clone(&env);
                thread::spawn(move || env.initialize())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(env.ref_count(), start + THREADS);

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let env = Arc::clone(&env);
                thread::spawn(move || env.destroy())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(env.ref_count(), start);
        assert!(env.is_initialized());
    }

    #[test]
    fn test_global_is_shared() {
        let a = Environment::global();
        let b = Environment::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
