//! Trace logs and their playback.
//!
//! ```text
//! capture world                         replay world (one per player)
//! ─────────────                         ─────────────────────────────
//! intercepted call ─→ TraceLog ─────────→ TraceLogPlayer::step_to(n)
//!                     ├ calls              ├ fresh ResourceRegistry
//!                     ├ resources          └ calls 0..=n re-executed
//!                     └ frame-end marks
//! ```
//!
//! The [`ResourceTrackingManager`] decides whether intercepted calls reach
//! the active trace log.

pub mod manager;
pub mod player;
pub mod trace_log;

pub use manager::ResourceTrackingManager;
pub use player::TraceLogPlayer;
pub use trace_log::{SharedTraceLog, TraceLog};
