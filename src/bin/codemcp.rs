//! codemcp -- standalone MCP pair-programming workspace server.
//!
//! Usage: codemcp [--workspace <path>] [--auto-init-git]

fn main() -> anyhow::Result<()> {
    // Tracing goes to stderr so it does not interfere with MCP stdio.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let workspace = args
        .iter()
        .skip_while(|a| *a != "--workspace")
        .nth(1)
        .map(std::path::PathBuf::from);
    let auto_init_git = args.iter().any(|a| a == "--auto-init-git");

    let config = codemcp::server::McpServerConfig {
        workspace,
        auto_init_git,
    };

    codemcp::run_mcp_server(config)
}
