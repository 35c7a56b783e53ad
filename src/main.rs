#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the MCP transport
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    unsub_tools::mcp::run_server().await
}
