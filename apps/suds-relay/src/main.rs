use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use suds_relay::config::Config;
use suds_relay::gateway::SessionGateway;
use suds_relay::handlers::SharedGateway;
use suds_relay::router;
use suds_relay::storage::{MemoryStore, RedisStore, SessionStore};

#[derive(Parser)]
#[command(name = "suds-relay", about = "Session relay for paired shower timers")]
struct Cli {
    /// Keep sessions in process memory instead of Redis
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() {
    // Default to WARN level if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env();
    info!("Starting suds relay on port {}", config.port);
    info!("Session TTL: {} seconds", config.session_ttl_seconds);

    let store: Arc<dyn SessionStore> = if cli.memory {
        info!("Using in-process session store");
        Arc::new(MemoryStore::new())
    } else {
        info!("Redis URL: {}", config.redis_url);
        match RedisStore::new(&config.redis_url, config.session_ttl_seconds).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Failed to connect to Redis: {}", e);
                std::process::exit(1);
            }
        }
    };

    let gateway: SharedGateway = Arc::new(SessionGateway::new(store, &config));
    gateway.limiter().spawn_sweeper();

    let app = router(gateway);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!("suds relay listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
