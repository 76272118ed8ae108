mod config;
mod error;
mod handlers;
mod ipam;
mod models;
mod provision;
mod router;
mod routeros;
mod ucrm;
mod unms;

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use ipam::IpPool;
use provision::Provisioner;
use routeros::Mikrotik;
use ucrm::UcrmClient;
use unms::{InventoryApi, UnmsClient};

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub provisioner: Arc<Provisioner>,
    pub inventory: Arc<dyn InventoryApi>,
    pub pool: IpPool,
    pub templates: tera::Tera,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ppp_bridge=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load and validate configuration before touching anything external
    let cfg = Config::load();
    if let Err(e) = cfg.validate() {
        tracing::error!("{}", e);
        anyhow::bail!("refusing to start with invalid configuration");
    }

    tracing::info!("Starting PppBridge");
    tracing::info!("Router: {}:{}", cfg.router_host, cfg.router_port);
    tracing::info!("CRM: {}", cfg.crm_url);
    tracing::info!("Managed ranges: {}", cfg.ip_ranges);
    tracing::info!("Listen: {}", cfg.listen_addr);

    let timeout = Duration::from_secs(cfg.call_timeout_secs);

    let crm = Arc::new(UcrmClient::new(
        cfg.crm_url.clone(),
        cfg.crm_app_key.clone(),
        timeout,
    )?);
    let inventory: Arc<dyn InventoryApi> = Arc::new(UnmsClient::new(
        cfg.nms_url.clone(),
        cfg.nms_token.clone(),
        timeout,
    )?);
    let target = Arc::new(Mikrotik {
        host: cfg.router_host.clone(),
        port: cfg.router_port,
        user: cfg.router_user.clone(),
        pass: cfg.router_pass.clone(),
        timeout,
    });

    let provisioner = Arc::new(Provisioner::new(
        cfg.clone(),
        crm,
        inventory.clone(),
        target,
    )?);

    let pool = IpPool::from_cidr_list(&cfg.ip_ranges)?;

    let mut templates = tera::Tera::default();
    templates.add_raw_template("ip_usage.html", include_str!("../templates/ip_usage.html"))?;

    // Create app state
    let state = Arc::new(AppState {
        config: cfg.clone(),
        provisioner,
        inventory,
        pool,
        templates,
    });

    // Build router
    let app = router::build(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    tracing::info!("PppBridge listening on {}", cfg.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("PppBridge shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
}
