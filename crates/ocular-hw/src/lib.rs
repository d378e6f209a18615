//! Ocular capture sources.
//!
//! [`ReplaySession`] plays back a recorded session (frames on disk plus the
//! landmarks the tracker reported for each) and serves as both the capture
//! device and the tracker of the pipeline.

pub mod replay;

pub use replay::{ReplayError, ReplaySession};
