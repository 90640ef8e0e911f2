use crate::id::Id;

/// One uniform enum surfaced by every layer of the registry, following
/// `control::error::AppError`'s shape of wrapping backend errors behind
/// `#[from]` and giving each kind its own user-facing message.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("resource not found in path: {id}")]
    MissingResource { id: Id },

    #[error("missing dependency while loading {id}: referenced resource could not be resolved")]
    MissingDependency { id: Id },

    #[error("store I/O error: {0}")]
    StoreIo(String),

    #[error("immutable store: {0}")]
    ImmutableStore(String),

    #[error("to save a resource you must give it a non-empty docstring describing it")]
    MissingDocstring,

    #[error("no schema info for {id}.{attr}")]
    SchemaMissing { id: Id, attr: String },

    #[error("shadow attribute {attr} is already bound to a different relation descriptor")]
    DuplicateBinding { attr: String },

    #[error("unknown persistent ID token encountered while loading: {0}")]
    UnknownReference(String),

    #[error("empty path: REGISTRY_PATH has no usable store entries")]
    EmptyPath,

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl From<sled::Error> for RegistryError {
    fn from(e: sled::Error) -> Self {
        RegistryError::StoreIo(e.to_string())
    }
}

impl From<sqlx::Error> for RegistryError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RegistryError::StoreIo("row not found".into()),
            other => RegistryError::StoreIo(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        RegistryError::StoreIo(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
