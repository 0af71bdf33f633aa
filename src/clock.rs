//! Injectable time source
//!
//! Backoff deadlines, alert cooldowns and recurring schedules are all computed
//! from a [`Clock`] instead of chained sleeps. The default [`TokioClock`] is
//! anchored on the tokio clock, so tests running with paused time
//! (`#[tokio::test(start_paused = true)]`) advance it deterministically.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

/// Source of "now" for every deadline in the engine
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock anchored at construction and advanced by the tokio clock
#[derive(Debug, Clone)]
pub struct TokioClock {
    anchor_wall: DateTime<Utc>,
    anchor_instant: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor_instant: tokio::time::Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().duration_since(self.anchor_instant);
        self.anchor_wall + Duration::from_std(elapsed).unwrap_or(Duration::zero())
    }
}
