//! Shared store connection for queue / dead-letter commands.
//!
//! The in-memory backend lives inside one daemon process, so these commands
//! only work against the Redis backend.

use trapline_core::config::TraplineConfig;

use crate::error::CliError;

#[cfg(feature = "redis")]
pub async fn connect(config: &TraplineConfig) -> Result<trapline_store::RedisStore, CliError> {
    ensure_shared(config)?;
    tracing::debug!("connecting to redis store");
    trapline_store::RedisStore::connect(&config.store.url)
        .await
        .map_err(|e| CliError::StoreUnavailable(e.to_string()))
}

#[cfg(not(feature = "redis"))]
pub async fn connect(config: &TraplineConfig) -> Result<trapline_store::MemoryStore, CliError> {
    ensure_shared(config)?;
    Err(CliError::StoreUnavailable(
        "trapline was built without redis support".to_owned(),
    ))
}

fn ensure_shared(config: &TraplineConfig) -> Result<(), CliError> {
    if config.store.backend == "redis" {
        Ok(())
    } else {
        Err(CliError::StoreUnavailable(format!(
            "store backend '{}' is private to the daemon process; configure [store] backend = \"redis\"",
            config.store.backend
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_is_refused() {
        let config = TraplineConfig::default();
        let err = connect(&config).await.err().expect("must fail");
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("memory"));
    }
}
