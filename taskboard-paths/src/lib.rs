//! Cross-platform path utilities for taskboard.
//!
//! Single source of truth for where the event daemon puts its socket and
//! where the daemon configuration lives.
//!
//! # Platform Behavior
//!
//! | Platform | Data Directory | Socket Directory |
//! |----------|----------------|------------------|
//! | Linux    | `~/.local/share/taskboard` | `$XDG_RUNTIME_DIR/taskboard` or data dir |
//! | macOS    | `~/Library/Application Support/taskboard` | Same as data dir |
//!
//! The `TASKBOARD_SOCKET` environment variable overrides the socket path
//! entirely.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

/// Errors specific to path operations.
#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not determine data directory")]
    NoDataDirectory,

    #[error("Could not determine config directory")]
    NoConfigDirectory,

    #[error("Invalid socket path: {0}")]
    InvalidSocketPath(String),
}

/// Application identifier used in path construction.
const APP_NAME: &str = "taskboard";

/// Socket file name for the event daemon.
const EVENT_SOCKET_NAME: &str = "taskboard.sock";

/// Daemon configuration file name.
const DAEMON_CONFIG_NAME: &str = "daemon.toml";

/// Environment variable overriding the event socket path.
pub const SOCKET_ENV_VAR: &str = "TASKBOARD_SOCKET";

/// Create `dir` (and its parents) with owner-only permissions if missing.
fn create_private_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }

    // Only directories created here get tightened, outermost first
    let missing: Vec<&Path> = dir.ancestors().take_while(|d| !d.exists()).collect();

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    #[cfg(unix)]
    for created in missing.iter().rev() {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o700);
        fs::set_permissions(created, perms)
            .with_context(|| format!("Failed to set permissions on {}", created.display()))?;
    }

    Ok(())
}

/// Get the application data directory.
///
/// Creates the directory if it doesn't exist with secure permissions (0o700).
///
/// # Errors
/// Returns an error if the directory cannot be determined or created.
pub fn get_data_dir() -> Result<PathBuf> {
    let base_dir = dirs::data_dir().ok_or(PathError::NoDataDirectory)?;
    let data_dir = base_dir.join(APP_NAME);
    create_private_dir(&data_dir)?;
    Ok(data_dir)
}

/// Get the socket directory for the event daemon.
///
/// # Platform Behavior
/// - **Linux**: Prefers `$XDG_RUNTIME_DIR/taskboard`, falls back to data dir
/// - **Other**: Uses the data directory
///
/// # Errors
/// Returns an error if the directory cannot be determined or created.
pub fn get_socket_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        if let Some(runtime_dir) = dirs::runtime_dir() {
            if runtime_dir.exists() {
                let socket_dir = runtime_dir.join(APP_NAME);
                create_private_dir(&socket_dir)?;
                return Ok(socket_dir);
            }
        }
        get_data_dir()
    }

    #[cfg(not(target_os = "linux"))]
    {
        get_data_dir()
    }
}

/// Resolve the event socket path from an environment lookup.
///
/// Split out from [`get_event_socket_path`] so callers can resolve against
/// something other than the process environment.
pub fn socket_path_from<F>(lookup: F) -> Result<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(SOCKET_ENV_VAR) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PathError::InvalidSocketPath(raw).into());
        }
        return Ok(PathBuf::from(trimmed));
    }

    Ok(get_socket_dir()?.join(EVENT_SOCKET_NAME))
}

/// Get the path to the event daemon socket.
///
/// # Errors
/// Returns an error if `TASKBOARD_SOCKET` is set but empty, or if the socket
/// directory cannot be determined.
pub fn get_event_socket_path() -> Result<PathBuf> {
    socket_path_from(|key| std::env::var(key).ok())
}

/// Get the configuration directory.
///
/// # Platform Behavior
/// - **Linux**: `~/.config/taskboard`
/// - **Other**: config lives with data
pub fn get_config_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let config_base = dirs::config_dir().ok_or(PathError::NoConfigDirectory)?;
        let config_dir = config_base.join(APP_NAME);
        create_private_dir(&config_dir)?;
        Ok(config_dir)
    }

    #[cfg(not(target_os = "linux"))]
    {
        get_data_dir()
    }
}

/// Get the path to the daemon configuration file.
pub fn get_daemon_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(DAEMON_CONFIG_NAME))
}

/// Make sure the directory that will hold `socket_path` exists.
///
/// Missing directories are created with mode 0o700.
pub fn ensure_socket_parent(socket_path: &Path) -> Result<()> {
    match socket_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => create_private_dir(parent),
        _ => Ok(()),
    }
}

/// Set secure Unix socket permissions.
///
/// Sets the socket to mode 0o600 (owner read/write only).
#[cfg(unix)]
pub fn secure_socket_permissions(socket_path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if socket_path.exists() {
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(socket_path, perms).with_context(|| {
            format!(
                "Failed to set socket permissions: {}",
                socket_path.display()
            )
        })?;
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn secure_socket_permissions(_socket_path: &Path) -> Result<()> {
    Ok(())
}
