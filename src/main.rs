use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

mod backend;
mod config;
mod crypto;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use backend::{
    Backend,
    feed::{ChangeBus, spawn_guestbook_poller},
    local::LocalBackend,
    supabase::SupabaseBackend,
};
use config::{AppConfig, BackendKind};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting wedding-invitation with config: {:?}", cfg);

    let bus = ChangeBus::new();
    let (backend, local) = match cfg.backend {
        BackendKind::Local => {
            let local = Arc::new(open_local(&cfg, bus.clone()).await?);
            if migrate {
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }
            (Backend::from_shared(local.clone()), Some(local))
        }
        BackendKind::Supabase => {
            if migrate {
                anyhow::bail!(
                    "--migrate applies to the local backend; apply migrations/supabase/0001_wedding.sql to the hosted project instead"
                );
            }
            let supabase_cfg = cfg
                .supabase
                .clone()
                .context("supabase backend selected without SUPABASE_URL")?;
            let remote = Arc::new(SupabaseBackend::new(supabase_cfg, bus.clone())?);
            let backend = Backend::from_shared(remote);
            spawn_guestbook_poller(backend.guestbook.clone(), bus.clone(), cfg.change_poll_interval);
            (backend, None)
        }
    };

    // --- Build router ---
    let addr = cfg.addr();
    let (host, port) = (cfg.host.clone(), cfg.port);
    let state = AppState::new(cfg, &backend, local).await;
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", port);
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
    axum::serve(listener, app).await?;

    Ok(())
}

/// Storage directory, SQLite file and schema for the local backend.
async fn open_local(cfg: &AppConfig, bus: ChangeBus) -> Result<LocalBackend> {
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir).await?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:")
        .split('?')
        .next()
        .unwrap_or_default();
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if !db_path.starts_with(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
        // SQLite only creates the file itself with `mode=rwc`.
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(db_path)
            .await
            .with_context(|| format!("opening database file {}", db_path))?;
    }

    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;

    let local = LocalBackend::new(
        Arc::new(db),
        cfg.storage_dir.clone(),
        cfg.public_base_url.clone(),
        bus,
    );
    local.migrate().await?;
    Ok(local)
}
