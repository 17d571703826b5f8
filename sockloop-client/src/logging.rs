//! Logging setup
//!
//! The crates log through `tracing`; connection ids are attached as the
//! `connection` field. With the `logging` feature, [`init_logging`] installs a
//! `tracing-subscriber` formatter filtered by `RUST_LOG`.

/// Initialize logging subsystem
#[cfg(feature = "logging")]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .try_init()?;

    Ok(())
}

/// Initialize logging subsystem (no-op when logging feature is disabled)
#[cfg(not(feature = "logging"))]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        // A second global subscriber is refused, not a panic.
        let first = init_logging();
        let second = init_logging();
        assert!(first.is_ok() || second.is_err());
    }
}
