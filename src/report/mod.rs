//! Structured test reports.

pub mod ctrf;

pub use ctrf::{CtrfReport, CtrfStatus, CtrfSummary, CtrfTest};
