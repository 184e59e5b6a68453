//! `$VAR` expansion for values handed to child processes.
//!
//! Install forms store secrets as references (`"GITHUB_TOKEN": "$GITHUB_TOKEN"`)
//! rather than literals; they are resolved from the caller's environment at
//! spawn time. Both `$NAME` and `${NAME}` are recognized, and `$$` yields a
//! literal `$`.

use regex::{Captures, Regex};
use std::sync::OnceLock;
use tracing::warn;

static VAR_REGEX: OnceLock<Regex> = OnceLock::new();

fn var_regex() -> &'static Regex {
    VAR_REGEX.get_or_init(|| {
        Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

/// Expand variable references using the process environment.
///
/// Unset variables expand to the empty string and are logged.
pub fn expand_env(value: &str) -> String {
    expand_env_with(value, |name| std::env::var(name).ok())
}

/// Expand variable references using a custom lookup.
pub fn expand_env_with<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if !value.contains('$') {
        return value.to_string();
    }

    var_regex()
        .replace_all(value, |caps: &Captures<'_>| {
            let Some(name) = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()) else {
                return "$".to_string();
            };
            match lookup(name) {
                Some(v) => v,
                None => {
                    warn!(variable = name, "Environment variable is not set");
                    String::new()
                }
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_plain_value_untouched() {
        assert_eq!(expand_env_with("production", lookup(&[])), "production");
    }

    #[test]
    fn test_dollar_name() {
        let vars = lookup(&[("TOKEN", "abc123")]);
        assert_eq!(expand_env_with("$TOKEN", vars), "abc123");
    }

    #[test]
    fn test_braced_name_inside_text() {
        let vars = lookup(&[("HOST", "example.com")]);
        assert_eq!(
            expand_env_with("https://${HOST}/mcp", vars),
            "https://example.com/mcp"
        );
    }

    #[test]
    fn test_bearer_prefix() {
        let vars = lookup(&[("API_KEY", "k")]);
        assert_eq!(expand_env_with("Bearer $API_KEY", vars), "Bearer k");
    }

    #[test]
    fn test_unset_expands_to_empty() {
        assert_eq!(expand_env_with("x$MISSING-y", lookup(&[])), "x-y");
    }

    #[test]
    fn test_escaped_dollar() {
        assert_eq!(expand_env_with("cost: $$5", lookup(&[])), "cost: $5");
    }

    #[test]
    fn test_lone_dollar_kept() {
        assert_eq!(expand_env_with("a $ b", lookup(&[])), "a $ b");
    }

    #[test]
    fn test_process_env() {
        let path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(expand_env("$PATH"), path);
    }
}
