pub mod agent_engine;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod mcp;
pub mod perception;

/// Install the `tracing` subscriber: `RUST_LOG` if set, `info` otherwise.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
