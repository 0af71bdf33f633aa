//! Actor-based monitoring runtime
//!
//! Each actor runs as an independent async task communicating via Tokio
//! channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────┐
//!                    │     Engine      │
//!                    └────────┬────────┘
//!                             │ owns
//!                ┌────────────┼────────────┐
//!                │            │            │
//!        ┌───────▼───────┐    │    ┌───────▼───────┐
//!        │ TargetMonitor │    │    │ TargetMonitor │ ── submit ──▶ ScriptEngine
//!        │  (target A)   │    │    │  (target N)   │
//!        └───────┬───────┘    │    └───────┬───────┘
//!                │            │            │
//!                └────────────┼────────────┘
//!                             │ AlertEvent (mpsc)
//!                   ┌─────────▼─────────┐
//!                   │    AlertActor     │ ── send ──▶ NotificationSink
//!                   └───────────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **TargetMonitorActor**: probes one target on its own deadline, tracks
//!   status, submits recovery scripts and evaluates thresholds
//! - **AlertActor**: evaluates alert rules, applies cooldowns, renders and
//!   delivers notifications
//! - **Retention**: purges old history on a fixed interval
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: Target loops publish alert events to the alert actor
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod alert;
pub mod messages;
pub mod retention;
pub mod scheduler;
pub mod target;
