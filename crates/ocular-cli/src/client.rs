//! D-Bus client for the running `oculard`.

use std::time::Duration;

use anyhow::{Context, Result};
use zbus::{proxy, Connection};

#[proxy(
    interface = "org.ocular.Ocular1",
    default_service = "org.ocular.Ocular1",
    default_path = "/org/ocular/Ocular1"
)]
pub trait Ocular {
    fn activate(&self) -> zbus::Result<()>;
    fn deactivate(&self) -> zbus::Result<()>;
    fn press_class(&self, class: u32) -> zbus::Result<()>;
    fn release(&self) -> zbus::Result<()>;
    fn status(&self) -> zbus::Result<String>;
    fn example_counts(&self) -> zbus::Result<String>;
}

pub async fn connect(session_bus: bool) -> Result<OcularProxy<'static>> {
    tracing::debug!(session_bus, "connecting to oculard");
    let connection = if session_bus {
        Connection::session().await
    } else {
        Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    OcularProxy::new(&connection)
        .await
        .context("failed to reach oculard (is the daemon running?)")
}

pub async fn status(proxy: &OcularProxy<'_>) -> Result<serde_json::Value> {
    let raw = proxy.status().await?;
    serde_json::from_str(&raw).context("daemon returned malformed status")
}

/// Hold `class` pressed until Ctrl-C, then release it.
pub async fn train(proxy: &OcularProxy<'_>, class: u32) -> Result<()> {
    proxy.press_class(class).await?;
    println!("Recording class {class}. Press Ctrl-C to stop.");

    let result = tokio::signal::ctrl_c().await;
    proxy.release().await?;
    result?;

    let counts = proxy.example_counts().await?;
    println!("Released. Examples per class: {counts}");
    Ok(())
}

/// Print every new prediction until Ctrl-C.
pub async fn watch(proxy: &OcularProxy<'_>, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let mut last_seq = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = status(proxy).await?;
                if let Some(line) = prediction_line(&status, &mut last_seq) {
                    println!("{line}");
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                return Ok(());
            }
        }
    }
}

/// Render a status document as one line when it carries a prediction not
/// printed before.
fn prediction_line(status: &serde_json::Value, last_seq: &mut Option<u64>) -> Option<String> {
    let prediction = status.get("prediction").filter(|p| !p.is_null())?;
    let seq = status.get("prediction_seq")?.as_u64()?;
    if *last_seq == Some(seq) {
        return None;
    }
    *last_seq = Some(seq);

    let class = prediction.get("class_index")?.as_u64()?;
    let confidences: Vec<String> = prediction
        .get("confidences")?
        .as_array()?
        .iter()
        .filter_map(|c| c.as_f64())
        .map(|c| format!("{c:.2}"))
        .collect();
    let events = status.get("events").and_then(|e| e.as_u64()).unwrap_or(0);
    Some(format!(
        "class {class}  confidences [{}]  events {events}",
        confidences.join(", ")
    ))
}
