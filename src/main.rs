/// ThunderBase 서버
///
/// SQLite 테이블의 변경을 트리거로 포착해 웹소켓 구독자에게 실시간으로 전달합니다.
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thunderbase::cdc_engine::{CdcConfig, CdcEngine};
use thunderbase::connection::ConnectionConfig;
use thunderbase::server::{create_router, AppState};
use thunderbase::trigger::PayloadMode;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_millis(name: &str, default: u64) -> Duration {
    Duration::from_millis(env_or(name, &default.to_string()).parse().unwrap_or(default))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 초기화
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thunderbase=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let payload_mode = env_or("THUNDERBASE_PAYLOAD", "row_id")
        .parse()
        .unwrap_or_else(|e| {
            warn!("{}, falling back to row_id", e);
            PayloadMode::RowId
        });

    let config = CdcConfig {
        connection: ConnectionConfig::new(env_or("THUNDERBASE_DB_PATH", "./thunderbase.db")),
        poll_interval: env_millis("THUNDERBASE_POLL_INTERVAL_MS", 1000),
        batch_size: env_or("THUNDERBASE_BATCH_SIZE", "100").parse().unwrap_or(100),
        write_timeout: env_millis("THUNDERBASE_WRITE_TIMEOUT_MS", 5000),
        payload_mode,
    };
    let listen_addr = env_or("THUNDERBASE_LISTEN_ADDR", "0.0.0.0:8080");
    let seed_table = Some(env_or("THUNDERBASE_SEED_TABLE", "users")).filter(|t| !t.is_empty());

    info!("Opening database at {}", config.connection.path);
    let engine = Arc::new(CdcEngine::new(config)?);

    // 데모용 테이블
    if let Some(ref table) = seed_table {
        engine.create_collection(table, &["name".to_string()])?;
    }

    engine.start().await?;

    let app = create_router(AppState::new(engine.clone(), seed_table));
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Server starting on http://{}", listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    })
    .await?;

    engine.stop().await?;
    Ok(())
}
