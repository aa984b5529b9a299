use std::net::SocketAddr;

use tokio::net::TcpListener;

use rally_server::auth;
use rally_server::config::{generate_config_template, Config};
use rally_server::db;
use rally_server::routes;
use rally_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "rally_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "rally_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("Rally server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Build application state
    let app_state = AppState::new(db, jwt_secret);

    // Rebuild sessions for matches that were in flight when the process
    // last stopped, before accepting any traffic.
    match app_state.matches.rehydrate().await {
        Ok(restored) if restored > 0 => {
            tracing::info!(restored, "restored in-flight matches from checkpoints");
        }
        Ok(_) => {}
        Err(err) => {
            tracing::error!(error = %err, "match rehydration failed");
        }
    }

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
