use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use faas_executor::api;
use faas_executor::config::{Config, LogFormat};
use faas_executor::container::{self, ContainerRuntime, PoolManager, PoolSettings};
use faas_executor::executor::ExecutionService;
use faas_executor::state::AppState;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config);

    info!("Starting FaaS executor");

    let docker = container::docker::connect(&config)
        .await
        .context("Failed to connect to Docker")?;

    let standard: Arc<dyn ContainerRuntime> =
        Arc::new(container::DockerRuntime::standard(docker.clone(), &config));
    let mut runtimes = vec![standard.clone()];
    if config.enable_sandboxed_backend {
        info!("Sandboxed backend enabled (runtime: {})", config.sandbox_runtime);
        runtimes.push(Arc::new(container::DockerRuntime::sandboxed(docker, &config)));
    } else {
        warn!("Sandboxed backend disabled");
    }

    let pool = Arc::new(PoolManager::new(runtimes, PoolSettings::from_config(&config)));
    let reaper = pool.spawn_reaper();
    if reaper.is_some() {
        info!(
            "Pool reaper running every {}s (idle TTL {}s)",
            config.pool_reaper_interval_seconds, config.pool_idle_ttl_seconds
        );
    }

    let service = Arc::new(ExecutionService::from_config(
        &config,
        pool.clone(),
        standard.clone(),
    ));
    let app_state = web::Data::new(AppState::new(config.clone(), service, standard));

    let bind_addr = format!("{}:{}", config.host, config.port);
    info!("Starting HTTP server on {}", bind_addr);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .configure(api::configure_routes)
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run()
    .await
    .context("HTTP server error")?;

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    pool.shutdown().await;

    Ok(())
}
