use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    log_tail::instrumentation::tracing::init_tracing()?;
    log_tail::instrumentation::tracing::init_panic_handler();

    // Main entrypoint simply delegates control to CLI layer.
    log_tail::cli::cli::run().await
}
