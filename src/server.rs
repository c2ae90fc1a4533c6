//! Server assembly and lifecycle.
//!
//! Wires the engine, worker pool, cursor registry, and result cache into a
//! dispatcher, then runs the actix server until a termination signal. The
//! heavy lifting lives in the dedicated modules so this file stays a thin
//! orchestrator.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use log::{error, info};

use crate::cache::{MemoryCache, RedbCache, ResultCache};
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::engine::QueryEngine;
use crate::executor::TaskExecutor;
use crate::handlers::{self, AppState};
use crate::registry::CursorRegistry;

/// Assemble the dispatcher from configuration and an engine handle.
pub fn build_dispatcher(
    engine: &dyn QueryEngine,
    config: &ServerConfig,
) -> anyhow::Result<Arc<Dispatcher>> {
    let executor = Arc::new(TaskExecutor::new(engine, config.engine.pool_size)?);
    let registry = Arc::new(CursorRegistry::new());

    let cache: Arc<dyn ResultCache> = if config.cache.enabled {
        if let Some(parent) = Path::new(&config.cache.path).parent() {
            fs::create_dir_all(parent)?;
        }
        info!("result cache at {}", config.cache.path);
        Arc::new(RedbCache::open(&config.cache.path)?)
    } else {
        info!("persistent result cache disabled, using in-memory cache");
        Arc::new(MemoryCache::new())
    };

    Ok(Arc::new(Dispatcher::new(executor, registry, cache)))
}

fn build_cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
        .max_age(3600)
}

/// Start the HTTP server and manage graceful shutdown.
pub async fn run(config: &ServerConfig, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", bind_addr);
    info!("Endpoints: GET/POST / (commands, WebSocket upgrade on GET), POST /cancel");

    let state = web::Data::new(AppState {
        dispatcher: Arc::clone(&dispatcher),
    });

    let server = HttpServer::new(move || {
        App::new()
            .wrap(build_cors())
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            if let Err(e) = result {
                error!("Server task failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
            server_handle.stop(true).await;
        }
    }

    // Abort whatever is still running so the worker threads can be joined.
    dispatcher.shutdown();

    info!("Server shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use tempfile::TempDir;

    #[test]
    fn test_build_dispatcher_with_persistent_cache() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = ServerConfig::default();
        config.cache.path = temp_dir
            .path()
            .join("cache/results.redb")
            .to_string_lossy()
            .into_owned();

        let engine = MockEngine::new();
        let dispatcher = build_dispatcher(&engine, &config).unwrap();
        assert!(dispatcher.registry().is_empty());
    }

    #[test]
    fn test_build_dispatcher_with_cache_disabled() {
        let mut config = ServerConfig::default();
        config.cache.enabled = false;

        let engine = MockEngine::new();
        assert!(build_dispatcher(&engine, &config).is_ok());
    }
}
