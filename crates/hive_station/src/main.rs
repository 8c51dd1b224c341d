//! # Hive Station
//!
//! Lê o DHT e o PIR da colmeia, registra leituras em JSON e serve o
//! dashboard, a API e o stream da câmera via HTTP.
//!
//! ## Uso
//! ```bash
//! hive_station                       # config.toml ao lado do executável
//! hive_station --config /etc/hive.toml
//! RUST_LOG=debug hive_station        # logs detalhados
//! ```

mod api;
mod camera;
mod gpio;
mod monitor;
mod motion;
mod station;

use anyhow::Context;
use api::AppState;
use camera::CameraManager;
use hive_core::config::AppConfig;
use hive_core::store::RecordStore;
use monitor::ReadingSource;
use station::Station;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = config_path_from_args().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    for problem in config.validate() {
        warn!("Config: {problem}");
    }

    // ── Sensores ──
    let source = ReadingSource::new(monitor::probe_sensor(&config.sensor));
    let motion = motion::probe_motion(&config.motion);
    let store = RecordStore::new(&config.store.path);
    let station = Arc::new(Station::new(source, motion, store, config.thresholds.clone()));

    // ── Câmera ──
    let camera = Arc::new(CameraManager::new(
        camera::backend_from_config(&config.camera),
        &config.camera,
    ));

    // ── Gravação periódica ──
    if config.recorder.interval_secs > 0 {
        let station = Arc::clone(&station);
        let period = Duration::from_secs(config.recorder.interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let station = Arc::clone(&station);
                if let Err(e) = tokio::task::spawn_blocking(move || station.read_and_record()).await {
                    warn!("Gravação periódica falhou: {e}");
                }
            }
        });
    }

    // ── HTTP ──
    let state = Arc::new(AppState {
        station: Arc::clone(&station),
        camera: Arc::clone(&camera),
        camera_defaults: config.camera.clone(),
        api_limit: config.store.api_limit,
    });
    let app = api::create_router(state, Some(config.server.static_dir.as_path()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Falha ao abrir {addr}"))?;

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   🐝 HIVE STATION – ATIVO (Rust)");
    println!("══════════════════════════════════════════════");
    println!("  HTTP:      http://{addr}");
    println!("  DHT:       {}", station.sensor_backend());
    println!("  PIR:       {}", station.motion_backend());
    println!("  Câmera:    {}", camera.backend_name());
    println!("  Registros: {}", config.store.path.display());
    if config.recorder.interval_secs > 0 {
        println!("  Gravação:  a cada {}s", config.recorder.interval_secs);
    }
    println!("══════════════════════════════════════════════");
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&camera)))
        .await
        .context("Erro no servidor HTTP")?;

    info!("Hive station encerrada");
    Ok(())
}

/// `--config <path>` na linha de comando.
fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

/// Aguarda Ctrl-C e libera a câmera antes de encerrar o servidor.
async fn shutdown_signal(camera: Arc<CameraManager>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Falha ao aguardar Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Encerrando...");
    if let Err(e) = tokio::task::spawn_blocking(move || camera.shutdown()).await {
        warn!("Falha ao parar câmera: {e}");
    }
}
