//! rct command-line entry point

#[tokio::main]
async fn main() {
    // Logs go to stderr so they never mix with program output or the result table
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    rct::cli::run().await;
}
