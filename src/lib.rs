//! A federated resource registry with schema-driven object graph
//! reconstruction: named, versioned, documented resources spread across
//! pluggable back-ends (local key-value file, SQL table, remote RPC
//! server), reconstructed from a serialized form where cross-resource
//! references are rewritten to symbolic IDs and resolved lazily back
//! through the registry itself. A companion schema subsystem records typed
//! relations between resources as a directed graph and materializes them as
//! shadow attributes at load time.
//!
//! Entry points: build a [`resolver::Resolver`] (directly, or via
//! [`resolver::Resolver::from_env`] reading `REGISTRY_PATH`), then either
//! call it directly or wrap it in a [`path::SharedResolver`] and traverse
//! with [`path::ResourcePath`].

pub mod codec;
pub mod config;
pub mod error;
pub mod id;
pub mod path;
pub mod resolver;
pub mod resource;
pub mod schema;
pub mod shadow;
pub mod store;

pub use error::{RegistryError, Result};
pub use id::Id;
pub use resolver::Resolver;
pub use resource::Resource;
