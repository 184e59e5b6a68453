//! Server registry.
//!
//! The registry is the only persisted piece of server state. It is stored as
//!
//! ```json
//! { "mcp_servers": { "<name>": { "id": "srv_...", "type": "stdio", ... } } }
//! ```
//!
//! and rewritten atomically (temp file + rename) after every mutation.

use crate::error::{McpError, McpResult};
use crate::server::{ServerConfig, ServerId, TransportConfig};
use mcpvisor_util::path::{default_registry_path, temp_sibling};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// One server as written to disk; the name is the map key.
#[derive(Debug, Serialize, Deserialize)]
struct StoredServer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<ServerId>,

    #[serde(default = "default_enabled", skip_serializing_if = "is_enabled")]
    enabled: bool,

    #[serde(flatten)]
    transport: TransportConfig,
}

fn default_enabled() -> bool {
    true
}

fn is_enabled(value: &bool) -> bool {
    *value
}

#[derive(Debug, Serialize)]
struct RegistryFile<'a> {
    mcp_servers: BTreeMap<&'a str, StoredServer>,
}

/// Registered MCP servers, keyed by id.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    path: Option<PathBuf>,
    servers: HashMap<ServerId, ServerConfig>,
}

impl ServerRegistry {
    /// A registry that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the registry stored at `path`.
    ///
    /// A missing or unreadable document yields an empty registry; entries
    /// that fail to parse or validate are skipped. Neither is an error.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut registry = Self {
            path: Some(path.clone()),
            servers: HashMap::new(),
        };

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Server registry not found, starting empty");
                return registry;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read server registry, starting empty");
                return registry;
            }
        };

        let document: serde_json::Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Malformed server registry, starting empty");
                return registry;
            }
        };
        let Some(entries) = document.get("mcp_servers").and_then(|v| v.as_object()) else {
            warn!(path = %path.display(), "Server registry has no 'mcp_servers' object, starting empty");
            return registry;
        };

        let mut assigned_ids = false;
        for (name, value) in entries {
            let stored: StoredServer = match serde_json::from_value(value.clone()) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(server = %name, error = %e, "Skipping malformed server entry");
                    continue;
                }
            };
            let id = stored.id.unwrap_or_else(|| {
                assigned_ids = true;
                ServerId::generate()
            });
            let config = ServerConfig {
                id,
                name: name.clone(),
                enabled: stored.enabled,
                transport: stored.transport,
            };
            if let Err(e) = registry.check_insert(&config) {
                warn!(server = %name, error = %e, "Skipping invalid server entry");
                continue;
            }
            registry.servers.insert(config.id.clone(), config);
        }

        debug!(path = %path.display(), count = registry.servers.len(), "Loaded server registry");

        // Persist generated ids so they stay stable across loads.
        if assigned_ids {
            if let Err(e) = registry.persist().await {
                warn!(path = %path.display(), error = %e, "Failed to store generated server ids");
            }
        }
        registry
    }

    /// Load the registry from the user's config directory, or fall back to
    /// an in-memory registry when there is none.
    pub async fn load_default() -> Self {
        match default_registry_path() {
            Some(path) => Self::load(path).await,
            None => {
                warn!("No config directory available, using an in-memory server registry");
                Self::in_memory()
            }
        }
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn name_taken(&self, name: &str, except: Option<&ServerId>) -> bool {
        self.servers
            .values()
            .any(|c| c.name == name && Some(&c.id) != except)
    }

    fn check_insert(&self, config: &ServerConfig) -> McpResult<()> {
        config.validate()?;
        if self.servers.contains_key(&config.id) {
            return Err(McpError::validation(format!(
                "server id '{}' is already registered",
                config.id
            )));
        }
        if self.name_taken(&config.name, None) {
            return Err(McpError::validation(format!(
                "a server named '{}' already exists",
                config.name
            )));
        }
        Ok(())
    }

    /// Add a server. Nothing is kept if validation or the write fails.
    pub async fn register(&mut self, config: ServerConfig) -> McpResult<ServerId> {
        self.check_insert(&config)?;
        let id = config.id.clone();
        self.servers.insert(id.clone(), config);

        if let Err(e) = self.persist().await {
            self.servers.remove(&id);
            return Err(e);
        }
        info!(id = %id, "Registered MCP server");
        Ok(id)
    }

    pub fn get(&self, id: &ServerId) -> Option<&ServerConfig> {
        self.servers.get(id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.values().find(|c| c.name == name)
    }

    /// Replace the config stored under `id`, keeping the id. Returns `false`
    /// when `id` is unknown.
    pub async fn update(&mut self, id: &ServerId, mut config: ServerConfig) -> McpResult<bool> {
        if !self.servers.contains_key(id) {
            return Ok(false);
        }
        config.id = id.clone();
        config.validate()?;
        if self.name_taken(&config.name, Some(id)) {
            return Err(McpError::validation(format!(
                "a server named '{}' already exists",
                config.name
            )));
        }

        let previous = self.servers.insert(id.clone(), config);
        if let Err(e) = self.persist().await {
            if let Some(previous) = previous {
                self.servers.insert(id.clone(), previous);
            }
            return Err(e);
        }
        info!(id = %id, "Updated MCP server");
        Ok(true)
    }

    /// Servers sorted by name.
    pub fn list(&self, include_disabled: bool) -> Vec<ServerConfig> {
        let mut servers: Vec<_> = self
            .servers
            .values()
            .filter(|c| include_disabled || c.enabled)
            .cloned()
            .collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }

    pub async fn remove(&mut self, id: &ServerId) -> McpResult<bool> {
        let Some(removed) = self.servers.remove(id) else {
            return Ok(false);
        };
        if let Err(e) = self.persist().await {
            self.servers.insert(id.clone(), removed);
            return Err(e);
        }
        info!(id = %id, "Removed MCP server");
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.servers.values().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }

    fn to_document(&self) -> McpResult<String> {
        let file = RegistryFile {
            mcp_servers: self
                .servers
                .values()
                .map(|c| {
                    (
                        c.name.as_str(),
                        StoredServer {
                            id: Some(c.id.clone()),
                            enabled: c.enabled,
                            transport: c.transport.clone(),
                        },
                    )
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    async fn persist(&self) -> McpResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = self.to_document()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let temp_path = temp_sibling(path);
        fs::write(&temp_path, content).await?;
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        debug!(path = %path.display(), "Wrote server registry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{HttpConfig, TransportKind};
    use tempfile::TempDir;

    fn registry_path(dir: &TempDir) -> PathBuf {
        dir.path().join("mcp_servers.json")
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let mut registry = ServerRegistry::in_memory();
        let config = ServerConfig::stdio("filesystem", "npx", ["-y", "server-filesystem"]);
        let id = registry.register(config.clone()).await.unwrap();

        assert_eq!(registry.get(&id), Some(&config));
        assert_eq!(registry.get_by_name("filesystem"), Some(&config));
        assert_eq!(registry.len(), 1);
        assert!(registry.get_by_name("missing").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let mut registry = ServerRegistry::in_memory();
        let first = ServerConfig::stdio("fs", "npx", ["a"]);
        registry.register(first.clone()).await.unwrap();

        let err = registry
            .register(ServerConfig::http("fs", "http://localhost"))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Validation(_)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_by_name("fs"), Some(&first));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let mut registry = ServerRegistry::in_memory();
        let first = ServerConfig::stdio("a", "cat", Vec::<String>::new());
        let mut second = ServerConfig::stdio("b", "cat", Vec::<String>::new());
        second.id = first.id.clone();
        registry.register(first).await.unwrap();
        assert!(registry.register(second).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_url_rejected() {
        let mut registry = ServerRegistry::in_memory();
        let config = ServerConfig::new("remote", TransportConfig::Http(HttpConfig::default()));
        assert!(matches!(
            registry.register(config).await,
            Err(McpError::Validation(_))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_update() {
        let mut registry = ServerRegistry::in_memory();
        let id = registry
            .register(ServerConfig::stdio("a", "cat", Vec::<String>::new()))
            .await
            .unwrap();
        registry
            .register(ServerConfig::stdio("b", "cat", Vec::<String>::new()))
            .await
            .unwrap();

        let renamed = ServerConfig::http("c", "https://example.com/mcp");
        assert!(registry.update(&id, renamed).await.unwrap());
        let stored = registry.get(&id).unwrap();
        assert_eq!(stored.name, "c");
        assert_eq!(stored.id, id);
        assert_eq!(stored.kind(), TransportKind::Http);

        // Renaming onto another server's name is rejected.
        let clash = ServerConfig::stdio("b", "cat", Vec::<String>::new());
        assert!(registry.update(&id, clash).await.is_err());

        let unknown = ServerId::from("srv_unknown");
        let config = ServerConfig::stdio("z", "cat", Vec::<String>::new());
        assert!(!registry.update(&unknown, config).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_sorted_and_filtered() {
        let mut registry = ServerRegistry::in_memory();
        for name in ["zeta", "alpha", "mid"] {
            registry
                .register(ServerConfig::stdio(name, "cat", Vec::<String>::new()))
                .await
                .unwrap();
        }
        registry
            .register(ServerConfig::stdio("beta", "cat", Vec::<String>::new()).disabled())
            .await
            .unwrap();

        let names: Vec<_> = registry.list(false).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        assert_eq!(registry.list(true).len(), 4);
        assert_eq!(registry.names(), vec!["alpha", "beta", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_remove() {
        let mut registry = ServerRegistry::in_memory();
        let id = registry
            .register(ServerConfig::stdio("a", "cat", Vec::<String>::new()))
            .await
            .unwrap();
        assert!(registry.remove(&id).await.unwrap());
        assert!(!registry.remove(&id).await.unwrap());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = registry_path(&dir);

        let mut registry = ServerRegistry::load(&path).await;
        assert!(registry.is_empty());

        let stdio = ServerConfig::stdio("filesystem", "npx", ["-y", "server"])
            .with_env("NODE_ENV", "production")
            .with_timeout(30);
        let http = ServerConfig::http("remote", "https://example.com/mcp")
            .with_header("Authorization", "Bearer $TOKEN")
            .disabled();
        registry.register(stdio.clone()).await.unwrap();
        registry.register(http.clone()).await.unwrap();
        assert!(!temp_sibling(&path).exists());

        let reloaded = ServerRegistry::load(&path).await;
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get_by_name("filesystem"), Some(&stdio));
        assert_eq!(reloaded.get_by_name("remote"), Some(&http));
    }

    #[tokio::test]
    async fn test_file_format() {
        let dir = TempDir::new().unwrap();
        let path = registry_path(&dir);
        let mut registry = ServerRegistry::load(&path).await;
        let config = ServerConfig::stdio("fs", "npx", ["-y"]);
        registry.register(config.clone()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let entry = &raw["mcp_servers"]["fs"];
        assert_eq!(entry["type"], "stdio");
        assert_eq!(entry["command"], "npx");
        assert_eq!(entry["id"], config.id.as_str());
        assert!(entry.get("name").is_none());
    }

    #[tokio::test]
    async fn test_load_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = registry_path(&dir);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(ServerRegistry::load(&path).await.is_empty());
    }

    #[tokio::test]
    async fn test_load_skips_bad_entries_and_assigns_ids() {
        let dir = TempDir::new().unwrap();
        let path = registry_path(&dir);
        let doc = serde_json::json!({
            "mcp_servers": {
                "good": {"type": "stdio", "command": "cat"},
                "no_url": {"type": "http"},
                "unknown_type": {"type": "carrier-pigeon"},
            }
        });
        std::fs::write(&path, doc.to_string()).unwrap();

        let registry = ServerRegistry::load(&path).await;
        assert_eq!(registry.names(), vec!["good"]);
        let id = registry.get_by_name("good").unwrap().id.clone();

        // The generated id was written back and is stable.
        let again = ServerRegistry::load(&path).await;
        assert_eq!(again.get_by_name("good").unwrap().id, id);
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let dir = TempDir::new().unwrap();
        // The parent "directory" is a regular file, so every write fails.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let path = blocker.join("mcp_servers.json");

        let mut registry = ServerRegistry::load(&path).await;
        let result = registry
            .register(ServerConfig::stdio("a", "cat", Vec::<String>::new()))
            .await;
        assert!(matches!(result, Err(McpError::Io(_))));
        assert!(registry.is_empty());
    }
}
