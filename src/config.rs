//! Where configuration comes from: a single environment variable,
//! `REGISTRY_PATH`, analogous to `control::config`'s `settings()` accessor
//! but with one external input instead of a layered `config/` directory.

use crate::error::{RegistryError, Result};

pub const ENV_VAR: &str = "REGISTRY_PATH";
pub const DEFAULT_PATH: &str = "~,.";
pub const SEPARATOR: char = ',';

/// One entry of a parsed path string, before it has been opened as a Store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathEntry {
    Http(String),
    MySql(String),
    LocalPath(String),
}

/// Auto-registration layer name an entry claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoLayer {
    Remote,
    MySql,
    System,
    My,
    Here,
}

impl AutoLayer {
    pub fn name(self) -> &'static str {
        match self {
            AutoLayer::Remote => "remote",
            AutoLayer::MySql => "MySQL",
            AutoLayer::System => "system",
            AutoLayer::My => "my",
            AutoLayer::Here => "here",
        }
    }
}

impl PathEntry {
    /// The layer this entry auto-registers as, decided from the entry's
    /// original (pre-expansion) text: `~`-prefixed paths are `my`,
    /// `.`-prefixed are `here`, anything else absolute is `system`.
    pub fn auto_layer(&self, raw: &str) -> AutoLayer {
        match self {
            PathEntry::Http(_) => AutoLayer::Remote,
            PathEntry::MySql(_) => AutoLayer::MySql,
            PathEntry::LocalPath(_) => {
                if raw.starts_with('~') {
                    AutoLayer::My
                } else if raw.starts_with('.') {
                    AutoLayer::Here
                } else {
                    AutoLayer::System
                }
            }
        }
    }
}

/// Read `REGISTRY_PATH` (or the default `~,.`) and split it into entries.
///
/// Scheme dispatch: `http://` → remote, `mysql:` → SQL, anything else → a
/// local filesystem path layer.
pub fn read_path_entries() -> Result<Vec<(AutoLayer, PathEntry)>> {
    let raw = std::env::var(ENV_VAR).unwrap_or_else(|_| DEFAULT_PATH.to_string());
    parse_path_entries(&raw)
}

pub fn parse_path_entries(raw: &str) -> Result<Vec<(AutoLayer, PathEntry)>> {
    let entries: Vec<(AutoLayer, PathEntry)> = raw
        .split(SEPARATOR)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let parsed = if let Some(rest) = entry.strip_prefix("http://") {
                PathEntry::Http(format!("http://{rest}"))
            } else if let Some(rest) = entry.strip_prefix("mysql:") {
                PathEntry::MySql(rest.to_string())
            } else {
                PathEntry::LocalPath(expand_home(entry))
            };
            let layer = parsed.auto_layer(entry);
            (layer, parsed)
        })
        .collect();

    if entries.is_empty() {
        return Err(RegistryError::EmptyPath);
    }
    Ok(entries)
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs_home() {
            return format!("{home}{rest}");
        }
    }
    path.to_string()
}

fn dirs_home() -> Option<String> {
    std::env::var("HOME").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_is_home_then_cwd() {
        let entries = parse_path_entries(DEFAULT_PATH).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, AutoLayer::My);
        assert_eq!(entries[1].0, AutoLayer::Here);
        assert!(matches!(entries[1].1, PathEntry::LocalPath(ref p) if p == "."));
    }

    #[test]
    fn schemes_are_dispatched() {
        let entries =
            parse_path_entries("http://example.org:8080,mysql:mydb.tbl,/abs/path,./rel").unwrap();
        assert_eq!(
            entries[0].1,
            PathEntry::Http("http://example.org:8080".to_string())
        );
        assert_eq!(entries[0].0, AutoLayer::Remote);
        assert_eq!(entries[1].1, PathEntry::MySql("mydb.tbl".to_string()));
        assert_eq!(entries[1].0, AutoLayer::MySql);
        assert_eq!(entries[2].1, PathEntry::LocalPath("/abs/path".to_string()));
        assert_eq!(entries[2].0, AutoLayer::System);
        assert_eq!(entries[3].1, PathEntry::LocalPath("./rel".to_string()));
        assert_eq!(entries[3].0, AutoLayer::Here);
    }

    #[test]
    fn empty_path_is_an_error() {
        assert!(parse_path_entries("").is_err());
    }
}
