//! Disk usage monitoring: persisted snapshot, background measurement, debounced limit check.

pub mod measure;
pub mod metadata;
pub mod storage_check;
