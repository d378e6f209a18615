use std::sync::Arc;

use ocular_core::{PipelineStatus, SchedulerError, SchedulerHandle, StoreError};
use zbus::interface;

use crate::config::Config;

pub const BUS_NAME: &str = "org.ocular.Ocular1";
pub const OBJECT_PATH: &str = "/org/ocular/Ocular1";

/// D-Bus interface for the Ocular eye-state daemon.
///
/// Bus name: org.ocular.Ocular1
/// Object path: /org/ocular/Ocular1
pub struct OcularService {
    pub config: Arc<Config>,
    pub scheduler: SchedulerHandle,
}

fn to_fdo(e: SchedulerError) -> zbus::fdo::Error {
    match e {
        SchedulerError::Store(StoreError::InvalidClass { .. }) => {
            zbus::fdo::Error::InvalidArgs(e.to_string())
        }
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

/// JSON document returned by `Status`.
pub fn status_json(config: &Config, status: &PipelineStatus) -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "num_classes": config.num_classes,
        "k": config.k,
        "embedder": format!("{:?}", config.embedder).to_lowercase(),
        "active": status.active,
        "training": status.training,
        "counts": status.counts,
        "prediction": status.prediction,
        "prediction_seq": status.prediction_seq,
        "events": status.events,
    })
}

#[interface(name = "org.ocular.Ocular1")]
impl OcularService {
    /// Start capture, tracking and classification.
    async fn activate(&self) -> zbus::fdo::Result<()> {
        tracing::info!("activate requested");
        self.scheduler.activate().await.map_err(|e| {
            tracing::error!(error = %e, "activate failed");
            to_fdo(e)
        })
    }

    async fn deactivate(&self) -> zbus::fdo::Result<()> {
        tracing::info!("deactivate requested");
        self.scheduler.deactivate().await.map_err(to_fdo)
    }

    /// Begin recording examples for `class` until `Release`.
    async fn press_class(&self, class: u32) -> zbus::fdo::Result<()> {
        tracing::info!(class, "press_class requested");
        self.scheduler.press_class(class as usize).await.map_err(|e| {
            tracing::warn!(class, error = %e, "press_class rejected");
            to_fdo(e)
        })
    }

    async fn release(&self) -> zbus::fdo::Result<()> {
        tracing::info!("release requested");
        self.scheduler.release().await.map_err(to_fdo)
    }

    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.scheduler.status();
        Ok(status_json(&self.config, &status).to_string())
    }

    async fn example_counts(&self) -> zbus::fdo::Result<String> {
        let counts = self.scheduler.status().counts;
        serde_json::to_string(&counts).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocular_core::PredictionResult;

    #[test]
    fn test_status_json_shape() {
        let config = Config::default();
        let status = PipelineStatus {
            active: true,
            training: Some(1),
            counts: vec![3, 4],
            prediction: Some(PredictionResult {
                class_index: 1,
                confidences: vec![0.3, 0.7],
            }),
            prediction_seq: 12,
            events: 2,
        };
        let json = status_json(&config, &status);
        assert_eq!(json["active"], true);
        assert_eq!(json["training"], 1);
        assert_eq!(json["counts"], serde_json::json!([3, 4]));
        assert_eq!(json["prediction"]["class_index"], 1);
        assert_eq!(json["prediction_seq"], 12);
        assert_eq!(json["embedder"], "pixel");
        assert_eq!(json["num_classes"], 2);
    }

    #[test]
    fn test_invalid_class_maps_to_invalid_args() {
        let err = to_fdo(SchedulerError::Store(StoreError::InvalidClass {
            index: 5,
            num_classes: 2,
        }));
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(_)));
        assert!(matches!(
            to_fdo(SchedulerError::ChannelClosed),
            zbus::fdo::Error::Failed(_)
        ));
    }
}
