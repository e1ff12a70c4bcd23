//! Locating the ONNX Runtime shared library on disk

use crate::error::{OnnxError, Result};
use std::path::{Path, PathBuf};

/// Environment variable consulted when no path is given explicitly.
pub const LIBRARY_PATH_ENV: &str = "ONNXRUNTIME_LIB_PATH";

/// Environment variable that disables the runtime version warning.
pub const SKIP_VERSION_CHECK_ENV: &str = "ONNXRUNTIME_SKIP_VERSION_CHECK";

/// Platform file name of the runtime library.
pub fn default_library_file_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "onnxruntime.dll"
    } else if cfg!(target_os = "macos") {
        "libonnxruntime.dylib"
    } else {
        "libonnxruntime.so"
    }
}

/// Resolve and validate the runtime library path.
///
/// Uses `explicit` when given, otherwise `ONNXRUNTIME_LIB_PATH`. The result
/// must name an existing regular file.
pub fn resolve_library_path(explicit: Option<&Path>) -> Result<PathBuf> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => match std::env::var_os(LIBRARY_PATH_ENV) {
            Some(value) if !value.is_empty() => PathBuf::from(value),
            _ => return Err(OnnxError::LibraryPathNotSet),
        },
    };
    validate_library_path(&path)?;
    Ok(path)
}

/// Check that `path` names an existing regular file.
pub fn validate_library_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(OnnxError::LibraryPathNotSet);
    }
    let metadata = std::fs::metadata(path).map_err(|e| {
        OnnxError::LibraryLoadFailed(format!("{}: {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(OnnxError::LibraryLoadFailed(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    Ok(())
}

pub(crate) fn version_check_disabled() -> bool {
    std::env::var_os(SKIP_VERSION_CHECK_ENV).is_some()
}

/// Minor version from a `major.minor.patch` string.
pub(crate) fn parse_minor_version(version: &str) -> Option<u32> {
    let mut parts = version.split('.');
    parts.next()?;
    parts.next()?.trim().parse().ok()
}
