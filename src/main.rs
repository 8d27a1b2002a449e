use anyhow::{Context, Result, bail};
use std::{fs::OpenOptions, io::ErrorKind, path::Path, sync::Arc, sync::Mutex};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod auth;
mod client;
mod config;
mod errors;
mod handlers;
mod models;
mod plans;
mod routes;
mod services;
mod store;

use crate::{
    auth::BasicCredentials,
    client::HttpClientFactory,
    config::{ServerConfig, StorageKind},
    models::instance::DatabaseCredentials,
    plans::PlanRegistry,
    services::broker_service::BrokerService,
    store::{
        MemoryStore, SqlStore, StardogStore, Store, sql::SqlStoreParameters,
        stardog::StardogStoreParameters,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config + migrate flag ---
    let (cfg, migrate) = ServerConfig::from_env_and_args()?;

    // --- Logging setup ---
    init_tracing(&cfg);
    tracing::info!("Starting stardog-service-broker with config: {:?}", cfg);

    // --- Handle migration mode ---
    if migrate {
        if cfg.storage.kind != StorageKind::Sql {
            bail!(
                "--migrate needs `sql` storage, the configured storage is {:?}",
                cfg.storage.kind
            );
        }
        let store = open_sql_store(&cfg).await?;
        let applied = store.migrate().await.context("running the schema migration")?;
        tracing::info!("Database migration complete ({} statements).", applied);
        return Ok(()); // exit after migration
    }

    // --- Plans and the Stardog client pool ---
    let plans = PlanRegistry::from_config(&cfg.plans).context("parsing the plan configuration")?;
    if plans.is_empty() {
        tracing::warn!("No plans are configured; the catalog will advertise none");
    } else {
        tracing::info!("Loaded {} plan(s)", plans.len());
    }
    let clients = HttpClientFactory::new().context("building the HTTP client")?;

    // --- Store ---
    let store: Arc<dyn Store> = match cfg.storage.kind {
        StorageKind::Memory => {
            tracing::warn!("Using in-memory storage; records are lost on restart");
            Arc::new(MemoryStore::new())
        }
        StorageKind::Sql => {
            let store = open_sql_store(&cfg).await?;
            store.migrate().await.context("creating the SQL schema")?;
            Arc::new(store)
        }
        StorageKind::Stardog => {
            let params: StardogStoreParameters =
                serde_json::from_value(cfg.storage.parameters.clone())
                    .context("parsing the stardog storage parameters")?;
            let client = clients.client(
                &params.stardog_url,
                DatabaseCredentials {
                    username: params.admin_username,
                    password: params.admin_password,
                },
            );
            let store = StardogStore::connect(client, &cfg.broker_id)
                .await
                .context("setting up the stardog data store")?;
            tracing::info!("Persisting broker records in {}", store.db_name());
            Arc::new(store)
        }
    };

    // --- Initialize core service ---
    let service = BrokerService::new(
        &cfg.broker_id,
        plans,
        store,
        Arc::new(clients),
        BasicCredentials::new(cfg.broker_username.clone(), cfg.broker_password.clone()),
    );

    // --- Build router ---
    let app = routes::routes::routes(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// `RUST_LOG` wins over the configured level. Output goes to `log_file`
/// when it can be opened, otherwise to stderr.
fn init_tracing(cfg: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.as_filter()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let Some(path) = cfg.log_file.as_deref().filter(|p| !p.trim().is_empty()) else {
        builder.with_writer(std::io::stderr).init();
        return;
    };
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => builder.with_ansi(false).with_writer(Mutex::new(file)).init(),
        Err(err) => {
            eprintln!("Failed to open the logging file {}. Logging to stderr: {}", path, err);
            builder.with_writer(std::io::stderr).init();
        }
    }
}

/// Open the SQLite store, creating the parent directory of a file database.
async fn open_sql_store(cfg: &ServerConfig) -> Result<SqlStore> {
    let params: SqlStoreParameters = if cfg.storage.parameters.is_null() {
        SqlStoreParameters::default()
    } else {
        serde_json::from_value(cfg.storage.parameters.clone())
            .context("parsing the sql storage parameters")?
    };
    let db_url = params.contact_string(&cfg.broker_id);
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if !db_path.starts_with(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    SqlStore::connect(&db_url)
        .await
        .with_context(|| format!("opening the SQL store at {}", db_url))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
