use anyhow::{Context, Result};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;

use silica_validator::{
    DatabasePool, EvaluationLoop, HttpWeightPublisher, LogWeightPublisher, MappingStore,
    MemoryMappingStore, PrometheusTelemetry, Registrar, RegistrationApiState, ScoringEngine,
    ScoringParams, SecurityMiddlewareConfig, SecurityState, ValidatorConfig, WeightPublisher,
    build_app,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first - this validates every section
    let config = ValidatorConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {:#}", e);
        eprintln!("Please check the SILICA_* environment variables.");
        e
    })?;

    init_secure_logging(&config)?;

    info!("Starting Silica validator");
    config.log_summary();

    let store = open_mapping_store(&config).await?;

    let registrar = Arc::new(Registrar::new(store.clone(), &config.registrar));

    let telemetry = Arc::new(
        PrometheusTelemetry::new(&config.telemetry, config.security.require_https)
            .context("Failed to create telemetry client")?,
    );

    let publisher: Arc<dyn WeightPublisher> = if config.publisher.endpoint.is_some() {
        Arc::new(
            HttpWeightPublisher::new(&config.publisher, config.security.require_https)
                .context("Failed to create weight publisher")?,
        )
    } else {
        warn!("No publisher endpoint configured, weights will only be logged");
        Arc::new(LogWeightPublisher)
    };

    let api_state = RegistrationApiState::new(registrar)
        .with_telemetry(telemetry.clone(), config.fetch_timeout());

    let evaluation = EvaluationLoop::new(
        store,
        telemetry,
        publisher,
        ScoringEngine::new(ScoringParams::from(&config.scoring)),
        config.evaluation_interval(),
        config.fetch_timeout(),
    );

    let security_state = SecurityState::new(SecurityMiddlewareConfig::from(&config));

    // Periodically drop expired rate limit windows
    let limiter = security_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            ticker.tick().await;
            limiter.cleanup();
        }
    });

    let app = build_app(api_state, security_state);

    let bind_addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("Validator listening on {}", bind_addr);
    info!(
        "Security middleware: Rate limit={}/min, Max body={}KB",
        config.security.rate_limit_per_minute,
        config.security.max_request_size / 1024
    );
    if config.security.require_https {
        info!("HTTPS enforcement enabled - outbound telemetry and publishing require TLS");
    }

    // Serve with connect info for client IP extraction
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .into_future();

    tokio::select! {
        result = server => {
            result.context("HTTP server failed")?;
        }
        result = evaluation.run() => {
            if let Err(e) = result {
                error!(error = %e, "Evaluation loop stopped on an invariant violation");
                return Err(e.into());
            }
        }
    }

    Ok(())
}

/// Open the SQLite mapping store, or an in-memory one when persistence is off
async fn open_mapping_store(config: &ValidatorConfig) -> Result<Arc<dyn MappingStore>> {
    if !config.database.enabled {
        warn!("Persistence disabled - bindings will be lost on restart");
        return Ok(Arc::new(MemoryMappingStore::new()));
    }

    let pool = DatabasePool::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to open mapping database")?;
    pool.init_schema()
        .await
        .context("Failed to initialize mapping schema")?;

    info!("Mapping store ready");
    Ok(Arc::new(pool.mappings().clone()))
}

/// Initialize secure logging with sanitization
fn init_secure_logging(config: &ValidatorConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(if config.logging.log_requests {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    if config.logging.sanitize_logs {
        info!("Secure logging initialized with data sanitization enabled");
    }

    Ok(())
}
