//! Status state tracker
//!
//! Pure debounce logic: given the previous [`StatusRecord`], the target's
//! script counters and one observation, compute the next record and whether a
//! recovery script should fire. No I/O, no clock access; the caller supplies
//! the observation time.
//!
//! ## Counting
//!
//! ```text
//! observation == last known status  → consecutive_count + 1
//! observation != last known status  → consecutive_count = 1, last_status_change = now,
//!                                     counters of the abandoned direction reset
//! observation == Unknown            → only `status` and `last_checked_at` change
//! ```
//!
//! ## Firing
//!
//! A direction fires when its script exists, `trigger_on_status` covers it,
//! `executions_used < max_executions` and either
//!
//! - the count reaches `duration_threshold` for the first time in this
//!   excursion, or
//! - the last execution failed (`retry_count > 0`) and another
//!   `duration_threshold` observations have passed since the last attempt.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::{DirectionCounters, ScriptBindings, Status, StatusRecord};

/// Single probe outcome fed into the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub status: Status,
    pub at: DateTime<Utc>,
}

/// Change between two known statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Status,
    pub to: Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    Idle,
    Fire { status: Status, retry: bool },
}

impl TriggerDecision {
    pub fn fires(&self) -> bool {
        matches!(self, TriggerDecision::Fire { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateUpdate {
    pub record: StatusRecord,
    pub counters: DirectionCounters,
    pub transition: Option<Transition>,
    pub decision: TriggerDecision,
}

/// Feed one observation into the tracker
pub fn observe(
    previous: &StatusRecord,
    counters: &DirectionCounters,
    scripts: &ScriptBindings,
    observation: Observation,
) -> StateUpdate {
    let Observation { status, at } = observation;

    if !status.is_known() {
        return StateUpdate {
            record: StatusRecord {
                status: Status::Unknown,
                last_checked_at: Some(at),
                ..*previous
            },
            counters: *counters,
            transition: None,
            decision: TriggerDecision::Idle,
        };
    }

    let mut counters = *counters;
    let last_known = previous.last_known_status;

    let (record, transition) = if last_known == status {
        let record = StatusRecord {
            status,
            consecutive_count: previous.consecutive_count.saturating_add(1),
            last_checked_at: Some(at),
            ..*previous
        };
        (record, None)
    } else {
        if let Some(abandoned) = counters.get_mut(last_known) {
            abandoned.reset();
        }
        let record = StatusRecord {
            status,
            last_known_status: status,
            consecutive_count: 1,
            last_status_change: at,
            last_checked_at: Some(at),
        };
        let transition = last_known.is_known().then_some(Transition {
            from: last_known,
            to: status,
        });
        (record, transition)
    };

    let decision = decide(&record, &counters, scripts, false);

    StateUpdate {
        record,
        counters,
        transition,
        decision,
    }
}

/// Decision for a trigger that was held back while another job was running
///
/// Same rules as [`observe`], except that a first attempt still fires when the
/// count has already gone past `duration_threshold`.
pub fn deferred_decision(
    record: &StatusRecord,
    counters: &DirectionCounters,
    scripts: &ScriptBindings,
) -> TriggerDecision {
    decide(record, counters, scripts, true)
}

fn decide(
    record: &StatusRecord,
    counters: &DirectionCounters,
    scripts: &ScriptBindings,
    catch_up: bool,
) -> TriggerDecision {
    let status = record.last_known_status;

    if !scripts.trigger_on_status.matches(status) {
        return TriggerDecision::Idle;
    }
    let (Some(config), Some(direction)) = (scripts.for_status(status), counters.get(status)) else {
        return TriggerDecision::Idle;
    };
    if direction.executions_used >= config.max_executions {
        return TriggerDecision::Idle;
    }

    let threshold = config.duration_threshold.max(1);
    let count = record.consecutive_count;

    match direction.last_attempt_count {
        None if count == threshold || (catch_up && count > threshold) => {
            TriggerDecision::Fire {
                status,
                retry: false,
            }
        }
        Some(last) if direction.retry_count > 0 && count >= last.saturating_add(threshold) => {
            TriggerDecision::Fire {
                status,
                retry: true,
            }
        }
        _ => TriggerDecision::Idle,
    }
}

/// Probe interval after `retry_count` consecutive failed recovery attempts
///
/// `base × multiplier^retry_count`, never above `max_backoff` (unless the base
/// itself already is).
pub fn effective_interval(
    base: Duration,
    multiplier: u32,
    retry_count: u32,
    max_backoff: Duration,
) -> Duration {
    if retry_count == 0 {
        return base;
    }

    let cap = max_backoff.max(base);
    u32::try_from(u64::from(multiplier.max(1)).saturating_pow(retry_count))
        .ok()
        .and_then(|factor| base.checked_mul(factor))
        .map_or(cap, |scaled| scaled.min(cap))
}

/// Effective interval for a target given the direction it currently sits in
pub fn backoff_interval(
    base: Duration,
    record: &StatusRecord,
    counters: &DirectionCounters,
    scripts: &ScriptBindings,
    max_backoff: Duration,
) -> Duration {
    let status = record.last_known_status;
    match (scripts.for_status(status), counters.get(status)) {
        (Some(config), Some(direction)) => effective_interval(
            base,
            config.retry_interval_multiplier,
            direction.retry_count,
            max_backoff,
        ),
        _ => base,
    }
}
