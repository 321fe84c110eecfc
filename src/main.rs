use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::{error, info, warn};

use storefront_api as api;
use api::{
    events::{LogNotifier, Notifier},
    services::payments::{CurrencyConverter, ExchangeRateClient, PayPalClient, PaymentProcessor},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events; notifications run off the request path
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(api::events::EventSender::new(event_tx));
    let notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
    tokio::spawn(api::events::process_events(event_rx, notifiers));

    // External payment collaborators
    let processor: Arc<dyn PaymentProcessor> = Arc::new(
        PayPalClient::new(&cfg.gateway).context("failed to build payment gateway client")?,
    );
    let converter: Arc<dyn CurrencyConverter> = Arc::new(
        ExchangeRateClient::new(&cfg.exchange_rates)
            .context("failed to build exchange rate client")?,
    );
    if cfg.gateway.client_id.is_empty() {
        warn!("Gateway credentials are not configured; gateway checkout will fail");
    }

    let auth_service = Arc::new(api::auth::AuthService::new(
        api::auth::AuthConfig::from_app_config(&cfg),
    ));

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        event_sender.clone(),
        processor,
        converter,
        &cfg,
    );

    spawn_pending_payment_sweeper(
        services.reconciler.clone(),
        cfg.gateway.sweep_interval_secs,
        cfg.gateway.pending_payment_ttl(),
    );

    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        services,
        auth: auth_service,
    };
    let app = api::app_router(app_state);

    // Bind and serve
    let ip = cfg
        .host
        .parse()
        .with_context(|| format!("invalid host address {}", cfg.host))?;
    let addr = SocketAddr::new(ip, cfg.port);
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Periodically abandons gateway payments the customer never came back for.
fn spawn_pending_payment_sweeper(
    reconciler: Arc<api::services::reconciler::PaymentReconciler>,
    interval_secs: u64,
    ttl: std::time::Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = reconciler.expire_stale(ttl).await {
                warn!(error = %e, "pending payment sweep failed");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
