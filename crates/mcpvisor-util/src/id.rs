//! Server identifiers: `srv_` followed by a lowercase ULID, so ids sort by
//! creation time.

use ulid::Ulid;

/// Known identifier prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    Server,
}

impl IdPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Server => "srv",
        }
    }
}

/// Identifier generation.
pub struct Identifier;

impl Identifier {
    /// Generate a fresh server id.
    pub fn server() -> String {
        format!(
            "{}_{}",
            IdPrefix::Server.as_str(),
            Ulid::new().to_string().to_lowercase()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_id_shape() {
        let id = Identifier::server();
        let (prefix, ulid) = id.split_once('_').unwrap();
        assert_eq!(prefix, "srv");
        assert_eq!(ulid.len(), 26);
        assert_eq!(ulid, ulid.to_lowercase());
    }

    #[test]
    fn test_server_ids_are_unique_and_ordered() {
        let a = Identifier::server();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Identifier::server();
        assert_ne!(a, b);
        assert!(a < b);
    }
}
