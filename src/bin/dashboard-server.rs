//! Survey Dashboard API Server Binary
//!
//! Run with: `cargo run --bin dashboard-server`

use survey_dashboard::{run_server, DashboardConfig, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Note: Tracing is initialized in run_server()
    // Set RUST_LOG environment variable to control log level:
    //   RUST_LOG=debug cargo run --bin dashboard-server
    //   RUST_LOG=survey_dashboard::fetcher=debug cargo run --bin dashboard-server  (paging only)

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()
        .unwrap_or(3000);

    let dashboard = match DashboardConfig::from_env() {
        Ok(dashboard) => dashboard,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            eprintln!("Set KOBO_TOKEN and ASSET_ID (or DASHBOARD_ENDPOINT) before starting.");
            std::process::exit(1);
        }
    };

    let config = ServerConfig::new(host, port, dashboard);

    println!("Starting Survey Dashboard API Server...");
    println!("   Host: {}", config.host);
    println!("   Port: {}", config.port);
    println!("   Source: {}", config.dashboard.endpoint);
    println!("   Cache TTL: {}s", config.dashboard.cache_ttl_seconds);
    println!();
    println!("Available endpoints:");
    println!("  GET  /health                - Health check");
    println!("  GET  /dashboard             - KPIs and chart data");
    println!("  GET  /submissions           - Filtered table");
    println!("  GET  /submissions/export    - Filtered table as CSV");
    println!("  GET  /filters               - Filter options");
    println!("  POST /refresh               - Clear cached data");
    println!();

    run_server(config).await?;

    Ok(())
}
