use std::sync::Arc;

use anyhow::{Context, Result};
use ocular_core::{spawn_scheduler, EmbeddingProvider, PixelEmbedder, SchedulerHandle};
use ocular_hw::ReplaySession;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod onnx;

use config::{Config, EmbedderKind};
use dbus_interface::{OcularService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("oculard starting");

    let config = Arc::new(Config::load().context("failed to load configuration")?);
    let provider = build_embedder(&config)?;

    let manifest = config
        .replay_manifest
        .as_deref()
        .context("no frame source configured (set OCULAR_REPLAY_MANIFEST)")?;
    let source = Arc::new(
        ReplaySession::open(manifest, config.replay_loop).context("failed to open frame source")?,
    );

    let scheduler = spawn_scheduler(
        config.scheduler_config(),
        source.clone(),
        source,
        provider,
    );
    tokio::spawn(log_predictions(scheduler.clone()));

    let service = OcularService {
        config: Arc::clone(&config),
        scheduler: scheduler.clone(),
    };
    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    if config.autostart {
        scheduler.activate().await.context("failed to activate pipeline")?;
    }

    tracing::info!(
        bus = if config.session_bus { "session" } else { "system" },
        name = BUS_NAME,
        "oculard ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("oculard shutting down");
    scheduler.deactivate().await?;

    Ok(())
}

fn build_embedder(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.embedder {
        EmbedderKind::Pixel => {
            tracing::info!(grid = config.pixel_grid, "using pixel embedder");
            Ok(Arc::new(PixelEmbedder::new(config.pixel_grid)))
        }
        EmbedderKind::Onnx => {
            let path = config.model_path();
            let digest = ocular_models::verify_model(&path, config.model_sha256.as_deref())?;
            tracing::info!(path = %path.display(), sha256 = %digest, "model verified");
            let embedder =
                onnx::OnnxEmbedder::load(&path, &config.onnx_input_name, config.onnx_input_size)?;
            Ok(Arc::new(embedder))
        }
    }
}

/// Publish each new prediction to the log as it arrives.
async fn log_predictions(scheduler: SchedulerHandle) {
    let mut rx = scheduler.subscribe();
    let mut last_seq = 0;
    let mut last_events = 0;
    while rx.changed().await.is_ok() {
        let status = rx.borrow_and_update().clone();
        if let Some(prediction) = &status.prediction {
            if status.prediction_seq != last_seq {
                last_seq = status.prediction_seq;
                tracing::debug!(
                    class = prediction.class_index,
                    confidences = ?prediction.confidences,
                    seq = status.prediction_seq,
                    "prediction"
                );
            }
        }
        if status.events > last_events {
            tracing::info!(events = status.events, "event counted");
        }
        last_events = status.events;
    }
}
