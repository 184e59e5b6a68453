//! Registry file fixtures.

use mcpvisor::ServerRegistry;
use mcpvisor_util::path::REGISTRY_FILE;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A registry file inside a temporary directory that is removed on drop.
///
/// # Example
///
/// ```rust
/// use mcpvisor_test_utils::TestRegistry;
///
/// let registry = TestRegistry::new().with_document(serde_json::json!({
///     "mcp_servers": { "fs": { "type": "stdio", "command": "cat" } }
/// }));
/// assert!(registry.path().exists());
/// ```
pub struct TestRegistry {
    temp_dir: TempDir,
    path: PathBuf,
}

impl TestRegistry {
    /// An empty directory; the registry file doesn't exist yet.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join(REGISTRY_FILE);
        Self { temp_dir, path }
    }

    /// Write `document` as the registry file.
    pub fn with_document(self, document: Value) -> Self {
        self.write_raw(&serde_json::to_string_pretty(&document).unwrap());
        self
    }

    /// Write arbitrary contents, e.g. to simulate corruption.
    pub fn write_raw(&self, contents: &str) {
        fs::write(&self.path, contents).expect("Failed to write registry file");
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Parse the registry file as it is on disk now.
    pub fn read_document(&self) -> Value {
        let contents = fs::read_to_string(&self.path).expect("Failed to read registry file");
        serde_json::from_str(&contents).expect("Registry file is not valid JSON")
    }

    /// Load a [`ServerRegistry`] backed by this file.
    pub async fn load(&self) -> ServerRegistry {
        ServerRegistry::load(&self.path).await
    }
}

impl Default for TestRegistry {
    fn default() -> Self {
        Self::new()
    }
}
