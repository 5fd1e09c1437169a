use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable that relocates every file the binary writes
pub const DATA_DIR_ENV: &str = "GAMBIT_DATA_DIR";

const IDENTITY_FILE: &str = "identity.json";

/// Directory holding identity, database and configuration files
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(custom) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(custom));
    }

    ProjectDirs::from("dev", "gambit", "gambit")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))
}

/// Get the default key storage path for the current platform
pub fn default_key_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(IDENTITY_FILE))
}

pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create key directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

/// Write key material readable by the owner only
pub fn save_key_secure(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_directory_exists(path)?;
    std::fs::write(path, contents)
        .with_context(|| format!("Failed to write key file: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict key file: {}", path.display()))?;
    }

    debug!("Saved key material to {}", path.display());
    Ok(())
}

pub fn load_key_secure(path: &Path) -> Result<Vec<u8>> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                warn!(
                    "Key file {} is accessible by other users (mode {:o})",
                    path.display(),
                    mode
                );
            }
        }
    }

    std::fs::read(path).with_context(|| format!("Failed to read key file: {}", path.display()))
}
