//! WinSentry monitoring engine
//!
//! Watches ports, processes, services and system resources, debounces their
//! status into transitions, runs recovery scripts and dispatches alerts.
//! Start an [`Engine`] with a [`Config`](config::Config) and manage it through
//! its async methods.

pub mod actors;
pub mod clock;
pub mod config;
pub mod engine;
pub mod model;
pub mod monitors;
pub mod notify;
pub mod probe;
pub mod registry;
pub mod script;
pub mod storage;
pub mod util;

pub use engine::{Engine, EngineBuilder, EngineError, EngineResult, TargetStatus};
