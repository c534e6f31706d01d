//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use workspace_tooling::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, WstError};

// Platform
pub use crate::platform::disk_usage::{DiskUsage, DuCommand, MeasureRequest};

// Monitor
pub use crate::monitor::measure::{MeasurePlan, MeasurementHandle, UsageMeasurer};
pub use crate::monitor::metadata::{MetadataStore, UsageSnapshot};
pub use crate::monitor::storage_check::{StorageCheck, StorageLimits, StorageReport};

// Scanner
pub use crate::scanner::cleanup::{CleanupEngine, CleanupPolicy, CleanupReport};
pub use crate::scanner::walker::FolderWalker;

// Sharing
pub use crate::sharing::token::TokenService;

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
