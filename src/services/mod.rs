//! Services - detection logic and state management
//!
//! This module contains the core detection services:
//! - `throttle` - Rate limit on detection cycles
//! - `transition` - One-slot Outside/Inside state machine
//! - `engine` - Per-sample detection cycle and the task that owns it
//! - `dispatcher` - Async notification worker fanning alerts out to sinks
//! - `replay` - Offline run of recorded samples through a fresh engine

pub mod dispatcher;
pub mod engine;
pub mod replay;
pub mod throttle;
pub mod transition;

// Re-export commonly used types
pub use dispatcher::{create_dispatcher, NotificationDispatcher, NotificationSink};
pub use engine::{create_detection_task, DetectionEngine, DetectionOutcome, DetectionTask};
pub use throttle::ThrottleGate;
pub use transition::{TransitionTracker, ZoneState};
