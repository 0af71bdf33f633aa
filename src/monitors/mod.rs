//! Pure evaluation logic
//!
//! - [`state`]: status debounce, trigger decisions and interval backoff
//! - [`threshold`]: resource aggregation and Normal/Warning/Critical classification

pub mod state;
pub mod threshold;
