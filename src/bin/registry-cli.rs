//! Entry point for poking at a registry from the shell: resolve one or more
//! dotted resource IDs off `REGISTRY_PATH` and print each body as JSON.
//! Installs the same `tracing-subscriber` + `EnvFilter` setup `control`'s
//! `startup.rs` does, so `RUST_LOG=resource_registry=debug` behaves the way
//! it would for any other binary in the workspace.

use anyhow::Context;
use resource_registry::{Id, Resolver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let ids: Vec<String> = std::env::args().skip(1).collect();
    if ids.is_empty() {
        anyhow::bail!("usage: registry-cli <id> [<id> ...]");
    }

    let mut resolver = Resolver::from_env()
        .await
        .context("opening registry path from REGISTRY_PATH")?;

    for raw_id in ids {
        let id = Id::new(raw_id.clone());
        match resolver.resolve(&id, None).await {
            Ok(resource) => {
                println!("{raw_id}: {}", serde_json::to_string_pretty(&resource.body)?);
            }
            Err(e) => {
                eprintln!("{raw_id}: {e}");
            }
        }
    }

    Ok(())
}
