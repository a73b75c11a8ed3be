//! Isolation-forest anomaly scan over per-minute network traffic counters.
//!
//! Pipeline: [`dataset`] loads the counter table, [`anomaly`] fits an
//! [`forest::IsolationForest`] and labels each row, [`report`] prints the
//! flagged rows, and [`histogram`] + [`render`] chart the score
//! distribution.

pub mod anomaly;
pub mod dataset;
pub mod error;
pub mod forest;
pub mod histogram;
pub mod render;
pub mod report;

pub use error::{Error, Result};
