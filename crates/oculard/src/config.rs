use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ocular_core::{EyeLandmarkIndices, SchedulerConfig, SmoothingConfig};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which embedding provider the daemon runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Downsampled luma thumbnail, no model needed.
    Pixel,
    /// ONNX feature extractor loaded from `model_path`.
    Onnx,
}

impl FromStr for EmbedderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pixel" => Ok(Self::Pixel),
            "onnx" => Ok(Self::Onnx),
            other => Err(format!("unknown embedder '{other}'")),
        }
    }
}

/// Daemon configuration: defaults, then an optional TOML file named by
/// `OCULAR_CONFIG_FILE`, then `OCULAR_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of gesture classes (at least 2).
    pub num_classes: usize,
    /// Neighbours voting in each prediction.
    pub k: usize,
    /// Side of the canonical eye crop in pixels.
    pub output_size: u32,
    /// Added to the eye box's larger side when cropping (display pixels).
    pub padding: f32,
    /// Classification tick period.
    pub tick_interval_ms: u64,
    /// Render/capture cycle period.
    pub frame_interval_ms: u64,
    pub eye_left_corner: usize,
    pub eye_top_lid: usize,
    pub eye_right_corner: usize,
    pub eye_bottom_lid: usize,
    /// Cap per class; the oldest example is evicted beyond it. Unbounded when unset.
    pub max_examples_per_class: Option<usize>,
    /// Embedding jobs allowed to run at once; further ticks are skipped.
    pub max_in_flight: usize,
    /// Weight of the newest eye region, 1.0 disables smoothing.
    pub smoothing_alpha: f32,
    /// Frames to reuse the last eye region after tracking drops.
    pub smoothing_hold_frames: u32,
    /// Class whose entries are counted as events (e.g. blinks).
    pub event_class: Option<usize>,
    pub embedder: EmbedderKind,
    /// Thumbnail side for the pixel embedder.
    pub pixel_grid: u32,
    /// Directory holding the ONNX embedding model.
    pub model_dir: PathBuf,
    /// Explicit model path; overrides `model_dir`.
    pub model_path: Option<PathBuf>,
    /// Expected SHA-256 of the model file, checked before loading.
    pub model_sha256: Option<String>,
    /// Square input side expected by the ONNX model.
    pub onnx_input_size: u32,
    /// Name of the model's image input tensor.
    pub onnx_input_name: String,
    /// Recorded session manifest used as the frame source.
    pub replay_manifest: Option<PathBuf>,
    pub replay_loop: bool,
    /// Activate the pipeline at start-up instead of waiting for `Activate`.
    pub autostart: bool,
    /// Serve on the session bus (development mode).
    pub session_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        let indices = EyeLandmarkIndices::default();
        Self {
            num_classes: 2,
            k: 10,
            output_size: 227,
            padding: 3.0,
            tick_interval_ms: 200,
            frame_interval_ms: 16,
            eye_left_corner: indices.left_corner,
            eye_top_lid: indices.top_lid,
            eye_right_corner: indices.right_corner,
            eye_bottom_lid: indices.bottom_lid,
            max_examples_per_class: None,
            max_in_flight: 1,
            smoothing_alpha: 1.0,
            smoothing_hold_frames: 0,
            event_class: None,
            embedder: EmbedderKind::Pixel,
            pixel_grid: 16,
            model_dir: default_model_dir(),
            model_path: None,
            model_sha256: None,
            onnx_input_size: 227,
            onnx_input_name: "input".to_string(),
            replay_manifest: None,
            replay_loop: true,
            autostart: false,
            session_bus: false,
        }
    }
}

impl Config {
    /// Resolve the configuration from file and environment, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("OCULAR_CONFIG_FILE") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `OCULAR_*` variables provided by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key);

        env_parse(&get, "OCULAR_NUM_CLASSES", &mut self.num_classes);
        env_parse(&get, "OCULAR_K", &mut self.k);
        env_parse(&get, "OCULAR_OUTPUT_SIZE", &mut self.output_size);
        env_parse(&get, "OCULAR_PADDING", &mut self.padding);
        env_parse(&get, "OCULAR_TICK_INTERVAL_MS", &mut self.tick_interval_ms);
        env_parse(&get, "OCULAR_FRAME_INTERVAL_MS", &mut self.frame_interval_ms);
        env_parse(&get, "OCULAR_EYE_LEFT_CORNER", &mut self.eye_left_corner);
        env_parse(&get, "OCULAR_EYE_TOP_LID", &mut self.eye_top_lid);
        env_parse(&get, "OCULAR_EYE_RIGHT_CORNER", &mut self.eye_right_corner);
        env_parse(&get, "OCULAR_EYE_BOTTOM_LID", &mut self.eye_bottom_lid);
        env_parse_opt(&get, "OCULAR_MAX_EXAMPLES_PER_CLASS", &mut self.max_examples_per_class);
        env_parse(&get, "OCULAR_MAX_IN_FLIGHT", &mut self.max_in_flight);
        env_parse(&get, "OCULAR_SMOOTHING_ALPHA", &mut self.smoothing_alpha);
        env_parse(&get, "OCULAR_SMOOTHING_HOLD_FRAMES", &mut self.smoothing_hold_frames);
        env_parse_opt(&get, "OCULAR_EVENT_CLASS", &mut self.event_class);
        env_parse(&get, "OCULAR_EMBEDDER", &mut self.embedder);
        env_parse(&get, "OCULAR_PIXEL_GRID", &mut self.pixel_grid);
        env_parse(&get, "OCULAR_ONNX_INPUT_SIZE", &mut self.onnx_input_size);

        if let Some(v) = get("OCULAR_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = get("OCULAR_MODEL_PATH") {
            self.model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("OCULAR_ONNX_INPUT_NAME") {
            self.onnx_input_name = v;
        }
        if let Some(v) = get("OCULAR_MODEL_SHA256") {
            self.model_sha256 = Some(v);
        }
        if let Some(v) = get("OCULAR_REPLAY_MANIFEST") {
            self.replay_manifest = Some(PathBuf::from(v));
        }
        if let Some(v) = get("OCULAR_REPLAY_LOOP") {
            self.replay_loop = v != "0";
        }
        if let Some(v) = get("OCULAR_AUTOSTART") {
            self.autostart = v != "0";
        }
        if get("OCULAR_SESSION_BUS").is_some() {
            self.session_bus = true;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.num_classes < 2 {
            return invalid(format!("num_classes must be at least 2, got {}", self.num_classes));
        }
        if self.k == 0 {
            return invalid("k must be at least 1".to_string());
        }
        if self.output_size == 0 || self.pixel_grid == 0 || self.onnx_input_size == 0 {
            return invalid("image sizes must be non-zero".to_string());
        }
        if self.max_in_flight == 0 {
            return invalid("max_in_flight must be at least 1".to_string());
        }
        if self.tick_interval_ms == 0 || self.frame_interval_ms == 0 {
            return invalid("tick and frame intervals must be non-zero".to_string());
        }
        if !(self.padding >= 0.0 && self.padding.is_finite()) {
            return invalid(format!("padding must be a non-negative number, got {}", self.padding));
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return invalid(format!("smoothing_alpha must be in (0, 1], got {}", self.smoothing_alpha));
        }
        if let Some(class) = self.event_class {
            if class >= self.num_classes {
                return invalid(format!(
                    "event_class {class} out of range for {} classes",
                    self.num_classes
                ));
            }
        }
        Ok(())
    }

    /// Path to the ONNX embedding model.
    pub fn model_path(&self) -> PathBuf {
        self.model_path
            .clone()
            .unwrap_or_else(|| self.model_dir.join(ocular_models::EMBEDDER_MODEL_NAME))
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            num_classes: self.num_classes,
            k: self.k,
            output_size: self.output_size,
            padding: self.padding,
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            eye_landmarks: EyeLandmarkIndices {
                left_corner: self.eye_left_corner,
                top_lid: self.eye_top_lid,
                right_corner: self.eye_right_corner,
                bottom_lid: self.eye_bottom_lid,
            },
            smoothing: SmoothingConfig {
                alpha: self.smoothing_alpha,
                hold_frames: self.smoothing_hold_frames,
            },
            max_examples_per_class: self.max_examples_per_class,
            event_class: self.event_class,
            max_in_flight: self.max_in_flight,
        }
    }
}

fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("ocular/models")
}

fn env_parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = get(key) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable setting"),
        }
    }
}

fn env_parse_opt<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut Option<T>) {
    if let Some(raw) = get(key) {
        if raw.is_empty() {
            *slot = None;
            return;
        }
        match raw.parse() {
            Ok(v) => *slot = Some(v),
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable setting"),
        }
    }
}
