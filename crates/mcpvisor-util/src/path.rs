//! Path utilities.

use std::path::{Path, PathBuf};

/// File name of the persisted server registry.
pub const REGISTRY_FILE: &str = "mcp_servers.json";

/// Get the mcpvisor configuration directory.
///
/// This follows XDG conventions on Linux/macOS:
/// - `$XDG_CONFIG_HOME/mcpvisor` if set
/// - `~/.config/mcpvisor` otherwise
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("mcpvisor"))
}

/// Default location of the server registry file.
pub fn default_registry_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(REGISTRY_FILE))
}

/// Sibling path used for atomic writes.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
