//! Discovery manifest.
//!
//! The loader finds this runtime through a small JSON artifact written at
//! install time. `XR_RUNTIME_JSON` overrides the manifest location, which
//! is how development builds are pointed at an uninstalled library.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable that overrides the manifest path.
pub const RUNTIME_JSON_ENV: &str = "XR_RUNTIME_JSON";
/// Manifest location used when the environment does not override it.
pub const DEFAULT_MANIFEST_PATH: &str = "/etc/xr/active_runtime.json";
/// Format version this runtime writes and accepts.
pub const FILE_FORMAT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeManifest {
    pub file_format_version: String,
    pub runtime: RuntimeEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeEntry {
    pub name: String,
    /// Absolute path to the runtime library the loader should dlopen.
    pub library_path: PathBuf,
}

impl RuntimeManifest {
    pub fn new(name: &str, library_path: impl Into<PathBuf>) -> Self {
        Self {
            file_format_version: FILE_FORMAT_VERSION.to_string(),
            runtime: RuntimeEntry {
                name: name.to_string(),
                library_path: library_path.into(),
            },
        }
    }

    /// Read and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let manifest: RuntimeManifest =
            serde_json::from_str(&text).context("manifest is not valid JSON")?;
        if manifest.file_format_version != FILE_FORMAT_VERSION {
            anyhow::bail!(
                "unsupported manifest format version {:?}",
                manifest.file_format_version
            );
        }
        Ok(manifest)
    }

    /// Write the manifest where the loader will look for it.
    pub fn write(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("failed to encode manifest")?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write manifest {}", path.display()))?;
        Ok(())
    }
}

/// The manifest path the loader will consult: `XR_RUNTIME_JSON` when set,
/// the system default otherwise.
pub fn manifest_path() -> PathBuf {
    std::env::var_os(RUNTIME_JSON_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST_PATH))
}
