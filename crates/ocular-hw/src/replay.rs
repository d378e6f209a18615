use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use image::RgbImage;
use ocular_core::{CaptureDevice, CaptureError, LandmarkSet, Resolution, Tracker};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode frame {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("frame {path} is {got_width}x{got_height}, expected {width}x{height}")]
    ResolutionMismatch {
        path: PathBuf,
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
}

#[derive(Debug, Deserialize)]
struct Manifest {
    display: Resolution,
    frames: Vec<FrameEntry>,
}

#[derive(Debug, Deserialize)]
struct FrameEntry {
    image: PathBuf,
    #[serde(default)]
    landmarks: Option<Vec<(f32, f32)>>,
}

#[derive(Debug, Default)]
struct Cursor {
    running: bool,
    next: usize,
    current: Option<usize>,
}

/// A recorded capture session.
///
/// Each call to `current_frame` delivers the next recorded frame;
/// `current_landmarks` returns what the tracker reported for the frame last
/// delivered. At the end the session wraps when looping, otherwise it keeps
/// showing the final frame.
pub struct ReplaySession {
    frames: Vec<Arc<RgbImage>>,
    landmarks: Vec<Option<LandmarkSet>>,
    display: Resolution,
    native: Resolution,
    looping: bool,
    cursor: Mutex<Cursor>,
}

impl ReplaySession {
    /// Load a session manifest and decode every frame up front.
    ///
    /// Image paths are resolved relative to the manifest's directory.
    pub fn open(manifest_path: &Path, looping: bool) -> Result<Self, ReplayError> {
        let text = std::fs::read_to_string(manifest_path).map_err(|source| ReplayError::Read {
            path: manifest_path.to_path_buf(),
            source,
        })?;
        let manifest: Manifest = serde_json::from_str(&text).map_err(|source| ReplayError::Parse {
            path: manifest_path.to_path_buf(),
            source,
        })?;
        let base = manifest_path.parent().unwrap_or(Path::new("."));

        let mut frames = Vec::with_capacity(manifest.frames.len());
        let mut landmarks = Vec::with_capacity(manifest.frames.len());
        for entry in manifest.frames {
            let path = base.join(&entry.image);
            let image = image::open(&path)
                .map_err(|source| ReplayError::Decode {
                    path: path.clone(),
                    source,
                })?
                .into_rgb8();

            if let Some(first) = frames.first().map(|f: &Arc<RgbImage>| Resolution::of(f)) {
                if Resolution::of(&image) != first {
                    return Err(ReplayError::ResolutionMismatch {
                        path,
                        width: first.width,
                        height: first.height,
                        got_width: image.width(),
                        got_height: image.height(),
                    });
                }
            }

            frames.push(Arc::new(image));
            landmarks.push(entry.landmarks.map(LandmarkSet::from));
        }

        tracing::info!(
            path = %manifest_path.display(),
            frames = frames.len(),
            tracked = landmarks.iter().filter(|l| l.is_some()).count(),
            "replay session loaded"
        );

        Ok(Self::from_parts(frames, landmarks, manifest.display, looping))
    }

    /// Build a session from frames already in memory.
    pub fn from_parts(
        frames: Vec<Arc<RgbImage>>,
        landmarks: Vec<Option<LandmarkSet>>,
        display: Resolution,
        looping: bool,
    ) -> Self {
        let native = frames
            .first()
            .map(|f| Resolution::of(f))
            .unwrap_or(display);
        Self {
            frames,
            landmarks,
            display,
            native,
            looping,
            cursor: Mutex::new(Cursor::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn cursor(&self) -> std::sync::MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CaptureDevice for ReplaySession {
    fn start(&self) -> Result<(), CaptureError> {
        if self.frames.is_empty() {
            return Err(CaptureError::Unavailable(
                "replay session has no frames".to_string(),
            ));
        }
        let mut cursor = self.cursor();
        cursor.running = true;
        cursor.next = 0;
        cursor.current = None;
        Ok(())
    }

    fn stop(&self) {
        let mut cursor = self.cursor();
        cursor.running = false;
        cursor.current = None;
    }

    fn current_frame(&self) -> Option<Arc<RgbImage>> {
        let mut cursor = self.cursor();
        if !cursor.running || self.frames.is_empty() {
            return None;
        }

        let index = if cursor.next < self.frames.len() {
            cursor.next
        } else if self.looping {
            0
        } else {
            self.frames.len() - 1
        };
        cursor.current = Some(index);
        cursor.next = index + 1;
        Some(Arc::clone(&self.frames[index]))
    }

    fn native_resolution(&self) -> Resolution {
        self.native
    }

    fn display_resolution(&self) -> Resolution {
        self.display
    }
}

impl Tracker for ReplaySession {
    fn current_landmarks(&self) -> Option<LandmarkSet> {
        let index = self.cursor().current?;
        self.landmarks.get(index).cloned().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::fs;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ocular-replay-test-{name}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_frame(dir: &Path, name: &str, w: u32, h: u32, shade: u8) {
        RgbImage::from_pixel(w, h, Rgb([shade, shade, shade]))
            .save(dir.join(name))
            .unwrap();
    }

    fn tiny(shade: u8) -> Arc<RgbImage> {
        Arc::new(RgbImage::from_pixel(4, 4, Rgb([shade, 0, 0])))
    }

    #[test]
    fn test_open_manifest() {
        let dir = temp_dir("open");
        write_frame(&dir, "f0.png", 64, 48, 10);
        write_frame(&dir, "f1.png", 64, 48, 200);
        fs::write(
            dir.join("session.json"),
            r#"{
                "display": {"width": 32, "height": 24},
                "frames": [
                    {"image": "f0.png", "landmarks": [[1.0, 2.0], [3.0, 4.0]]},
                    {"image": "f1.png", "landmarks": null}
                ]
            }"#,
        )
        .unwrap();

        let session = ReplaySession::open(&dir.join("session.json"), true).unwrap();
        assert_eq!(session.len(), 2);
        assert_eq!(session.native_resolution(), Resolution::new(64, 48));
        assert_eq!(session.display_resolution(), Resolution::new(32, 24));

        CaptureDevice::start(&session).unwrap();
        let f0 = session.current_frame().unwrap();
        assert_eq!(f0.get_pixel(0, 0).0[0], 10);
        assert_eq!(session.current_landmarks().unwrap().len(), 2);

        let f1 = session.current_frame().unwrap();
        assert_eq!(f1.get_pixel(0, 0).0[0], 200);
        assert!(session.current_landmarks().is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_open_rejects_mixed_resolutions() {
        let dir = temp_dir("mixed");
        write_frame(&dir, "a.png", 64, 48, 0);
        write_frame(&dir, "b.png", 32, 48, 0);
        fs::write(
            dir.join("session.json"),
            r#"{"display": {"width": 64, "height": 48},
                "frames": [{"image": "a.png"}, {"image": "b.png"}]}"#,
        )
        .unwrap();

        let err = ReplaySession::open(&dir.join("session.json"), false).err().unwrap();
        assert!(matches!(err, ReplayError::ResolutionMismatch { got_width: 32, .. }));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_open_reports_missing_manifest() {
        let dir = temp_dir("missing");
        let err = ReplaySession::open(&dir.join("nope.json"), false).err().unwrap();
        assert!(matches!(err, ReplayError::Read { .. }));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_looping_wraps() {
        let s = ReplaySession::from_parts(vec![tiny(1), tiny(2)], vec![None, None], Resolution::new(4, 4), true);
        CaptureDevice::start(&s).unwrap();
        let shades: Vec<u8> = (0..5).map(|_| s.current_frame().unwrap().get_pixel(0, 0).0[0]).collect();
        assert_eq!(shades, vec![1, 2, 1, 2, 1]);
    }

    #[test]
    fn test_non_looping_holds_last_frame() {
        let s = ReplaySession::from_parts(vec![tiny(1), tiny(2)], vec![None, None], Resolution::new(4, 4), false);
        CaptureDevice::start(&s).unwrap();
        let shades: Vec<u8> = (0..4).map(|_| s.current_frame().unwrap().get_pixel(0, 0).0[0]).collect();
        assert_eq!(shades, vec![1, 2, 2, 2]);
    }

    #[test]
    fn test_stopped_session_yields_nothing() {
        let lm = Some(LandmarkSet::from(vec![(0.0, 0.0)]));
        let s = ReplaySession::from_parts(vec![tiny(1)], vec![lm], Resolution::new(4, 4), true);
        assert!(s.current_frame().is_none());
        CaptureDevice::start(&s).unwrap();
        assert!(s.current_frame().is_some());
        assert!(s.current_landmarks().is_some());
        CaptureDevice::stop(&s);
        assert!(s.current_frame().is_none());
        assert!(s.current_landmarks().is_none());
    }

    #[test]
    fn test_empty_session_fails_to_start() {
        let s = ReplaySession::from_parts(vec![], vec![], Resolution::new(4, 4), true);
        assert!(matches!(CaptureDevice::start(&s), Err(CaptureError::Unavailable(_))));
    }
}
