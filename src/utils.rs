//! Host integration helpers
//!
//! - State fallback: `~/.local/state/roleguard/` when `HA_RSCTMP` is unset
//! - Program lookup on `PATH`

use directories::ProjectDirs;
use std::path::PathBuf;

/// Directory used when the cluster manager provides no `HA_RSCTMP`
pub const RUNTIME_FALLBACK_DIR: &str = "/run/resource-agents";

pub fn get_state_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "clusterlabs", "roleguard")
        .and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

/// Whether `name` is an executable file somewhere on `PATH`
pub fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if is_executable(&full_path) {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}
