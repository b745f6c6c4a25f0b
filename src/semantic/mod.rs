//! Semantic layer - output line classification and status tracking

pub mod router;
pub mod status;

pub use router::{
    classify, classify_tagged, is_phase_marker, is_result_marker, LogCategory, LogEvent,
    LogRouter, Routed, RunSummary, SUMMARY_INTERVAL,
};
pub use status::{StatusTone, StatusUpdate};
