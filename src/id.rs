use std::fmt;

/// Prefixes reserved by the registry itself; never valid as a resource root.
pub const RESERVED_PREFIXES: &[&str] = &[
    "SCHEMA.",
    "0version",
    "0root",
    "PYGRLAYERNAME",
    "__edges__.",
];

/// A dot-separated resource identifier, e.g. `Bio.seq.Swissprot`.
///
/// IDs are opaque to the registry except for the root-prefix rule and the
/// reserved sentinel prefixes used internally for schema and version data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Id(String);

impl Id {
    pub fn new(raw: impl Into<String>) -> Self {
        Id(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The prefix before the first dot, i.e. the resource's root namespace.
    pub fn root(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// True for sentinel keys the registry uses for its own bookkeeping
    /// (`0version`, `0root`, `PYGRLAYERNAME`) or for schema entries
    /// (`SCHEMA.<id>`).
    pub fn is_reserved(&self) -> bool {
        RESERVED_PREFIXES
            .iter()
            .any(|p| self.0 == *p || self.0.starts_with(p))
    }

    /// The `SCHEMA.<id>` key under which this ID's schema entry is stored.
    pub fn schema_key(&self) -> Id {
        Id(format!("SCHEMA.{}", self.0))
    }

    pub fn with_suffix(&self, suffix: &str) -> Id {
        Id(format!("{}.{}", self.0, suffix))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::new(s)
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_prefix_before_first_dot() {
        assert_eq!(Id::new("Bio.seq.Swissprot").root(), "Bio");
        assert_eq!(Id::new("T").root(), "T");
    }

    #[test]
    fn reserved_prefixes_are_detected() {
        assert!(Id::new("0version").is_reserved());
        assert!(Id::new("0root").is_reserved());
        assert!(Id::new("PYGRLAYERNAME").is_reserved());
        assert!(Id::new("SCHEMA.T.one").is_reserved());
        assert!(!Id::new("T.one").is_reserved());
    }

    #[test]
    fn schema_key_is_namespaced() {
        assert_eq!(Id::new("T.one").schema_key().as_str(), "SCHEMA.T.one");
    }
}
