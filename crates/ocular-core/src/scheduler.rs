//! Frame scheduler: the capture → rectify → embed → train → classify cycle.
//!
//! One task owns all pipeline state and selects over control commands, the
//! render interval (capture, track, rectify into a single most-recent slot),
//! the slower classification interval, and embedding completions. Embedding
//! runs on the blocking pool with at most `max_in_flight` ticks outstanding;
//! a classification tick that finds the limit reached is skipped. Each tick
//! carries the activation epoch and a sequence number; a completion from an
//! older activation, or one older than the last published prediction, is
//! dropped, and a tick whose activation has ended no longer trains.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

use crate::classifier::{KnnClassifier, PredictionResult};
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::events::EventCounter;
use crate::geometry::{compute_eye_region, EyeLandmarkIndices};
use crate::ports::{CaptureDevice, CaptureError, Tracker};
use crate::rectify::{rectify, CanonicalEyeImage};
use crate::smoothing::{RegionSmoother, SmoothingConfig};
use crate::store::{ExampleStore, StoreError};
use crate::training::TrainingController;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("scheduler task exited")]
    ChannelClosed,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub num_classes: usize,
    pub k: usize,
    pub output_size: u32,
    pub padding: f32,
    pub frame_interval: Duration,
    pub tick_interval: Duration,
    pub eye_landmarks: EyeLandmarkIndices,
    pub smoothing: SmoothingConfig,
    pub max_examples_per_class: Option<usize>,
    pub event_class: Option<usize>,
    /// Embedding jobs allowed to run at once; 0 is treated as 1.
    pub max_in_flight: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_classes: 2,
            k: 10,
            output_size: 227,
            padding: 3.0,
            frame_interval: Duration::from_millis(16),
            tick_interval: Duration::from_millis(200),
            eye_landmarks: EyeLandmarkIndices::default(),
            smoothing: SmoothingConfig::default(),
            max_examples_per_class: None,
            event_class: None,
            max_in_flight: 1,
        }
    }
}

/// Snapshot published after every state change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub active: bool,
    pub training: Option<usize>,
    pub counts: Vec<usize>,
    pub prediction: Option<PredictionResult>,
    /// Sequence number of the tick that produced `prediction`.
    pub prediction_seq: u64,
    pub events: u64,
}

enum SchedulerCommand {
    Activate {
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    Deactivate {
        reply: oneshot::Sender<()>,
    },
    PressClass {
        class: usize,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    Release {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the scheduler task.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
    status: watch::Receiver<PipelineStatus>,
}

impl SchedulerHandle {
    /// Start capture, tracking and both cadences.
    ///
    /// A capture device that fails to start is reported here and the
    /// pipeline stays inactive.
    pub async fn activate(&self) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::Activate { reply }).await?;
        rx.await.map_err(|_| SchedulerError::ChannelClosed)?
    }

    /// Stop both cadences. Returns once no further prediction can be
    /// published for the previous activation.
    pub async fn deactivate(&self) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::Deactivate { reply }).await?;
        rx.await.map_err(|_| SchedulerError::ChannelClosed)
    }

    pub async fn press_class(&self, class: usize) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::PressClass { class, reply }).await?;
        rx.await.map_err(|_| SchedulerError::ChannelClosed)?
    }

    pub async fn release(&self) -> Result<(), SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.send(SchedulerCommand::Release { reply }).await?;
        rx.await.map_err(|_| SchedulerError::ChannelClosed)
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.status.clone()
    }

    async fn send(&self, cmd: SchedulerCommand) -> Result<(), SchedulerError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| SchedulerError::ChannelClosed)
    }
}

/// Spawn the scheduler task on the current tokio runtime.
///
/// The pipeline starts inactive. The task exits, deactivating first, when
/// every handle has been dropped.
pub fn spawn_scheduler(
    config: SchedulerConfig,
    capture: Arc<dyn CaptureDevice>,
    tracker: Arc<dyn Tracker>,
    provider: Arc<dyn EmbeddingProvider>,
) -> SchedulerHandle {
    let store = Arc::new(ExampleStore::with_capacity_limit(
        config.num_classes,
        config.max_examples_per_class,
    ));
    let (status_tx, status_rx) = watch::channel(PipelineStatus {
        counts: vec![0; config.num_classes],
        ..PipelineStatus::default()
    });
    let (tx, rx) = mpsc::channel(16);

    let pipeline = Pipeline::new(config, capture, tracker, store, status_tx);
    tokio::spawn(run(pipeline, provider, rx));

    SchedulerHandle {
        tx,
        status: status_rx,
    }
}

async fn run(
    mut pipeline: Pipeline,
    provider: Arc<dyn EmbeddingProvider>,
    mut rx: mpsc::Receiver<SchedulerCommand>,
) {
    let classifier = KnnClassifier::new(pipeline.config.k);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<TickOutcome>();

    let mut render = tokio::time::interval(pipeline.config.frame_interval);
    render.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut classify = tokio::time::interval(pipeline.config.tick_interval);
    classify.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        classes = pipeline.config.num_classes,
        k = pipeline.config.k,
        tick_ms = pipeline.config.tick_interval.as_millis() as u64,
        "scheduler started"
    );

    loop {
        let active = pipeline.active;
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    SchedulerCommand::Activate { reply } => {
                        let result = pipeline.activate();
                        if result.is_ok() {
                            render.reset();
                            classify.reset();
                        }
                        let _ = reply.send(result);
                    }
                    SchedulerCommand::Deactivate { reply } => {
                        pipeline.deactivate();
                        let _ = reply.send(());
                    }
                    SchedulerCommand::PressClass { class, reply } => {
                        let _ = reply.send(pipeline.press_class(class));
                    }
                    SchedulerCommand::Release { reply } => {
                        pipeline.release();
                        let _ = reply.send(());
                    }
                }
            }
            _ = render.tick(), if active => pipeline.render_frame(),
            _ = classify.tick(), if active => {
                if let Some(job) = pipeline.begin_tick() {
                    let provider = Arc::clone(&provider);
                    let store = Arc::clone(&pipeline.store);
                    let done = done_tx.clone();
                    tokio::task::spawn_blocking(move || {
                        let outcome = run_tick(job, provider.as_ref(), &store, &classifier);
                        let _ = done.send(outcome);
                    });
                }
            }
            Some(outcome) = done_rx.recv() => pipeline.complete(outcome),
        }
    }

    pipeline.deactivate();
    tracing::info!("scheduler exiting");
}

struct TickJob {
    epoch: u64,
    /// Epoch of the pipeline as it is now, shared with the owning task.
    live_epoch: Arc<AtomicU64>,
    seq: u64,
    image: Arc<CanonicalEyeImage>,
    training: Option<usize>,
}

struct TickOutcome {
    epoch: u64,
    seq: u64,
    appended: bool,
    result: Result<Option<PredictionResult>, EmbeddingError>,
}

/// Embed the image, append it when training, then classify.
///
/// The embedding is owned by this function and dropped on every return
/// path, which runs the provider's release hook exactly once.
fn run_tick(
    job: TickJob,
    provider: &dyn EmbeddingProvider,
    store: &ExampleStore,
    classifier: &KnnClassifier,
) -> TickOutcome {
    let embedding = match provider.embed(&job.image).and_then(|e| {
        e.validate()?;
        Ok(e)
    }) {
        Ok(e) => e,
        Err(e) => {
            return TickOutcome {
                epoch: job.epoch,
                seq: job.seq,
                appended: false,
                result: Err(e),
            }
        }
    };

    let mut appended = false;
    if let Some(class) = job.training {
        if job.live_epoch.load(Ordering::SeqCst) != job.epoch {
            tracing::debug!(seq = job.seq, "activation ended, example not recorded");
        } else {
            match store.add_example(class, &embedding) {
                Ok(()) => appended = true,
                Err(e) => tracing::error!(error = %e, seq = job.seq, "training append rejected"),
            }
        }
    }

    let prediction = if store.count_per_class().iter().any(|&c| c > 0) {
        Some(classifier.predict(embedding.values(), store))
    } else {
        None
    };

    TickOutcome {
        epoch: job.epoch,
        seq: job.seq,
        appended,
        result: Ok(prediction),
    }
}

struct Pipeline {
    config: SchedulerConfig,
    capture: Arc<dyn CaptureDevice>,
    tracker: Arc<dyn Tracker>,
    store: Arc<ExampleStore>,
    training: TrainingController,
    smoother: RegionSmoother,
    events: EventCounter,
    latest: Option<Arc<CanonicalEyeImage>>,
    active: bool,
    epoch: u64,
    live_epoch: Arc<AtomicU64>,
    in_flight: usize,
    next_seq: u64,
    last_published: u64,
    status: watch::Sender<PipelineStatus>,
}

impl Pipeline {
    fn new(
        config: SchedulerConfig,
        capture: Arc<dyn CaptureDevice>,
        tracker: Arc<dyn Tracker>,
        store: Arc<ExampleStore>,
        status: watch::Sender<PipelineStatus>,
    ) -> Self {
        Self {
            training: TrainingController::new(config.num_classes),
            smoother: RegionSmoother::new(config.smoothing),
            events: EventCounter::new(config.event_class),
            config,
            capture,
            tracker,
            store,
            latest: None,
            active: false,
            epoch: 0,
            live_epoch: Arc::new(AtomicU64::new(0)),
            in_flight: 0,
            next_seq: 0,
            last_published: 0,
            status,
        }
    }

    fn activate(&mut self) -> Result<(), SchedulerError> {
        if self.active {
            return Ok(());
        }
        self.capture.start()?;
        self.tracker.start();
        self.active = true;
        self.epoch += 1;
        self.live_epoch.store(self.epoch, Ordering::SeqCst);

        let native = self.capture.native_resolution();
        tracing::info!(
            epoch = self.epoch,
            width = native.width,
            height = native.height,
            "pipeline active"
        );
        self.status.send_modify(|s| s.active = true);
        Ok(())
    }

    fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        self.capture.stop();
        self.tracker.stop();
        self.active = false;
        self.epoch += 1;
        self.live_epoch.store(self.epoch, Ordering::SeqCst);
        self.latest = None;
        self.smoother.reset();
        self.events.reset();

        tracing::info!(epoch = self.epoch, "pipeline inactive");
        self.status.send_modify(|s| {
            s.active = false;
            s.prediction = None;
            s.events = 0;
        });
    }

    fn press_class(&mut self, class: usize) -> Result<(), SchedulerError> {
        self.training.press_class(class)?;
        tracing::debug!(class, "training pressed");
        self.status.send_modify(|s| s.training = Some(class));
        Ok(())
    }

    fn release(&mut self) {
        self.training.release();
        tracing::debug!("training released");
        self.status.send_modify(|s| s.training = None);
    }

    /// One render cycle: refresh the canonical eye image slot.
    fn render_frame(&mut self) {
        let Some(frame) = self.capture.current_frame() else {
            tracing::trace!("no frame available yet");
            return;
        };

        let raw = self
            .tracker
            .current_landmarks()
            .and_then(|landmarks| landmarks.eye_corners(&self.config.eye_landmarks))
            .map(|corners| compute_eye_region(&corners, self.config.padding));
        if raw.is_none() {
            tracing::trace!("tracking unavailable this frame");
        }

        let Some(region) = self.smoother.update(raw) else {
            return;
        };

        let image = rectify(
            &frame,
            self.capture.display_resolution(),
            &region,
            self.config.output_size,
        );
        self.latest = Some(Arc::new(image));
    }

    /// Issue a classification tick for the latest image, if there is one
    /// and an embedding slot is free.
    fn begin_tick(&mut self) -> Option<TickJob> {
        let image = Arc::clone(self.latest.as_ref()?);
        if self.in_flight >= self.config.max_in_flight.max(1) {
            tracing::debug!(in_flight = self.in_flight, "embedding busy, tick skipped");
            return None;
        }
        self.in_flight += 1;
        self.next_seq += 1;
        let job = TickJob {
            epoch: self.epoch,
            live_epoch: Arc::clone(&self.live_epoch),
            seq: self.next_seq,
            image,
            training: self.training.active_class(),
        };
        tracing::debug!(seq = job.seq, training = ?job.training, "tick issued");
        Some(job)
    }

    fn complete(&mut self, outcome: TickOutcome) {
        self.in_flight = self.in_flight.saturating_sub(1);

        if outcome.appended {
            let counts = self.store.count_per_class();
            tracing::debug!(seq = outcome.seq, ?counts, "example added");
            self.status.send_modify(|s| s.counts = counts);
        }

        if outcome.epoch != self.epoch || !self.active {
            tracing::debug!(seq = outcome.seq, "discarding completion from previous activation");
            return;
        }

        let prediction = match outcome.result {
            Ok(Some(p)) => p,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(seq = outcome.seq, error = %e, "embedding failed, tick skipped");
                return;
            }
        };

        if outcome.seq <= self.last_published {
            tracing::debug!(
                seq = outcome.seq,
                last = self.last_published,
                "discarding stale prediction"
            );
            return;
        }
        self.last_published = outcome.seq;
        self.events.observe(prediction.class_index);

        tracing::debug!(
            seq = outcome.seq,
            class = prediction.class_index,
            confidences = ?prediction.confidences,
            "prediction published"
        );
        let events = self.events.count();
        let seq = outcome.seq;
        self.status.send_modify(|s| {
            s.prediction = Some(prediction);
            s.prediction_seq = seq;
            s.events = events;
        });
    }
}
