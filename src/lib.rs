//! GPS run-session tracking core
//!
//! Samples flow filter → accumulator → goal evaluator inside a [`Tracker`];
//! the [`SessionRunner`] drives a tracker from a location source and keeps
//! its state recoverable through periodic snapshots.

pub mod accumulator;
pub mod clock;
pub mod compress;
pub mod config;
pub mod continuity;
pub mod error;
pub mod events;
pub mod export;
pub mod filter;
pub mod geo;
pub mod goal;
pub mod health;
pub mod runtime;
pub mod sample;
pub mod session;
pub mod source;
pub mod store;
pub mod summary;
pub mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use compress::PathCompressor;
pub use config::TrackerConfig;
pub use continuity::{ContinuityManager, SnapshotWriter};
pub use error::{TrackerError, TrackerResult, Transition};
pub use events::{ProgressEvent, TrackerEvent};
pub use filter::{FilterStats, RejectReason};
pub use goal::{Goal, GoalKind};
pub use runtime::{Command, SessionRunner};
pub use sample::{AccuracyClass, LocationSample};
pub use session::{Session, SessionState};
pub use source::{ChannelSource, LocationSource, ReplaySource, SamplePusher};
pub use store::{FileSnapshotStore, MemorySnapshotStore, SessionSnapshot, SnapshotStore};
pub use summary::RunSummary;
pub use tracker::Tracker;
