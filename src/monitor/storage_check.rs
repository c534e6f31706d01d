//! Debounced storage limit check.
//!
//! A check never measures inline. When the cached snapshot is older than
//! [`CHECK_INTERVAL_MINUTES`] it starts a background measurement and answers
//! from the cache; a size over its limit gets one short wait and re-read so a
//! fast measurement can still correct a stale warning.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::core::config::{CHECK_INTERVAL_MINUTES, Config, StorageConfig};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, Dimension, emit};
use crate::monitor::measure::{MeasurePlan, MeasurementHandle, UsageMeasurer};
use crate::monitor::metadata::{MetadataStore, UsageSnapshot, local_now};
use crate::platform::disk_usage::DiskUsage;

const KB_PER_GB: u64 = 1024 * 1024;

/// Configured limits in GB; `None` disables a dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageLimits {
    pub max_workspace_folder_size_gb: Option<u64>,
    pub max_container_size_gb: Option<u64>,
}

impl StorageLimits {
    #[must_use]
    pub const fn from_config(storage: &StorageConfig) -> Self {
        Self {
            max_workspace_folder_size_gb: storage.max_workspace_folder_size_gb,
            max_container_size_gb: storage.max_container_size_gb,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.max_workspace_folder_size_gb.is_none() && self.max_container_size_gb.is_none()
    }
}

/// Answer of a storage check. Only configured dimensions carry size and limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageReport {
    pub workspace_folder_size_warning: bool,
    pub container_size_warning: bool,
    /// GB, one decimal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_size_limit: Option<u64>,
    /// GB, one decimal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_folder_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_folder_size_limit: Option<u64>,
}

/// Report plus the background measurement it started, if any.
#[derive(Debug)]
pub struct StorageCheckOutcome {
    pub report: StorageReport,
    /// Dropping this detaches the measurement thread.
    pub refresh: Option<MeasurementHandle>,
}

struct DimensionReading {
    size_gb: Option<f64>,
    limit_gb: u64,
    warning: bool,
}

pub struct StorageCheck {
    limits: StorageLimits,
    measurer: Arc<UsageMeasurer>,
    freshness_nudge: Duration,
    logger: Option<ActivityLoggerHandle>,
}

impl StorageCheck {
    #[must_use]
    pub fn new(
        limits: StorageLimits,
        measurer: Arc<UsageMeasurer>,
        freshness_nudge: Duration,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            limits,
            measurer,
            freshness_nudge,
            logger,
        }
    }

    /// Check measuring only the dimensions that have a limit.
    #[must_use]
    pub fn from_config(
        config: &Config,
        disk_usage: Arc<dyn DiskUsage>,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        let plan = MeasurePlan::for_limits(&config.storage, config.paths.workspace_home.clone());
        let measurer = UsageMeasurer::new(
            disk_usage,
            MetadataStore::new(config.paths.metadata_file()),
            plan,
            logger.clone(),
        );
        Self::new(
            StorageLimits::from_config(&config.storage),
            Arc::new(measurer),
            Duration::from_millis(config.storage.freshness_nudge_ms),
            logger,
        )
    }

    #[must_use]
    pub const fn limits(&self) -> StorageLimits {
        self.limits
    }

    pub fn check(&self) -> StorageCheckOutcome {
        self.check_at(local_now())
    }

    /// Run a check as of `now` (local naive time, like the snapshot).
    pub fn check_at(&self, now: NaiveDateTime) -> StorageCheckOutcome {
        let neutral = StorageCheckOutcome {
            report: StorageReport::default(),
            refresh: None,
        };
        if self.limits.is_empty() {
            return neutral;
        }

        let store = self.measurer.store();
        if store
            .minutes_since_update(now)
            .is_some_and(|minutes| minutes < CHECK_INTERVAL_MINUTES)
        {
            return neutral;
        }

        let refresh = self.measurer.spawn_refresh();
        let mut report = StorageReport::default();

        if let Some(limit) = self.limits.max_container_size_gb {
            let reading = self.read_dimension(store, Dimension::Container, limit);
            report.container_size = reading.size_gb;
            report.container_size_limit = Some(reading.limit_gb);
            report.container_size_warning = reading.warning;
        }
        if let Some(limit) = self.limits.max_workspace_folder_size_gb {
            let reading = self.read_dimension(store, Dimension::Workspace, limit);
            report.workspace_folder_size = reading.size_gb;
            report.workspace_folder_size_limit = Some(reading.limit_gb);
            report.workspace_folder_size_warning = reading.warning;
        }

        emit(
            self.logger.as_ref(),
            ActivityEvent::StorageChecked {
                refresh_started: refresh.is_some(),
                container_warning: report.container_size_warning,
                workspace_warning: report.workspace_folder_size_warning,
            },
        );

        StorageCheckOutcome { report, refresh }
    }

    fn read_dimension(
        &self,
        store: &MetadataStore,
        dimension: Dimension,
        limit_gb: u64,
    ) -> DimensionReading {
        let before = store.read();
        let mut size_kb = before.as_ref().and_then(|s| size_of(s, dimension));

        if size_kb.is_some_and(|kb| exceeds(kb, limit_gb)) {
            thread::sleep(self.freshness_nudge);
            if let Some(after) = store.read()
                && before
                    .as_ref()
                    .is_none_or(|earlier| after.updated_at > earlier.updated_at)
            {
                size_kb = size_of(&after, dimension);
            }
        }

        let warning = size_kb.is_some_and(|kb| exceeds(kb, limit_gb));
        if let Some(kb) = size_kb
            && warning
        {
            emit(
                self.logger.as_ref(),
                ActivityEvent::SizeLimitExceeded {
                    dimension,
                    size_kb: kb,
                    limit_gb,
                },
            );
        }

        DimensionReading {
            size_gb: size_kb.map(kb_to_rounded_gb),
            limit_gb,
            warning,
        }
    }
}

const fn size_of(snapshot: &UsageSnapshot, dimension: Dimension) -> Option<u64> {
    match dimension {
        Dimension::Container => snapshot.container_size_kb,
        Dimension::Workspace => snapshot.workspace_size_kb,
    }
}

/// Strictly greater than the limit; exactly at the limit does not warn.
const fn exceeds(size_kb: u64, limit_gb: u64) -> bool {
    size_kb > limit_gb.saturating_mul(KB_PER_GB)
}

#[allow(clippy::cast_precision_loss)]
fn kb_to_rounded_gb(size_kb: u64) -> f64 {
    let gb = size_kb as f64 / KB_PER_GB as f64;
    (gb * 10.0).round() / 10.0
}
