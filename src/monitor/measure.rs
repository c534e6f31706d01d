//! One measure-and-write cycle, run inline or on a detached background thread.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use crate::core::config::StorageConfig;
use crate::core::errors::{Result, WstError};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, Dimension, emit};
use crate::monitor::metadata::{MetadataStore, UsageSnapshot};
use crate::platform::disk_usage::{DiskUsage, MeasureRequest};

/// Which dimensions to measure and where they live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurePlan {
    /// `None` leaves the container size unknown.
    pub container: Option<MeasureRequest>,
    pub workspace: Option<MeasureRequest>,
}

impl MeasurePlan {
    /// Measure only the dimensions that have a configured limit.
    #[must_use]
    pub fn for_limits(storage: &StorageConfig, workspace_home: PathBuf) -> Self {
        Self {
            container: storage
                .max_container_size_gb
                .map(|_| container_request(storage)),
            workspace: storage
                .max_workspace_folder_size_gb
                .map(|_| MeasureRequest::new(workspace_home).one_file_system(true)),
        }
    }

    /// Measure both dimensions regardless of limits.
    #[must_use]
    pub fn everything(storage: &StorageConfig, workspace_home: PathBuf) -> Self {
        Self {
            container: Some(container_request(storage)),
            workspace: Some(MeasureRequest::new(workspace_home).one_file_system(true)),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.container.is_none() && self.workspace.is_none()
    }
}

fn container_request(storage: &StorageConfig) -> MeasureRequest {
    MeasureRequest::new(storage.container_root.clone())
        .one_file_system(true)
        .excluding(&storage.container_excluded_paths)
}

/// Measures usage and persists it through the [`MetadataStore`].
///
/// At most one background cycle runs at a time per measurer.
pub struct UsageMeasurer {
    disk_usage: Arc<dyn DiskUsage>,
    store: MetadataStore,
    plan: MeasurePlan,
    logger: Option<ActivityLoggerHandle>,
    in_flight: Arc<AtomicBool>,
}

/// Joinable handle for a background measurement.
///
/// Dropping it detaches the thread; the measurement still completes.
#[derive(Debug)]
pub struct MeasurementHandle {
    join: thread::JoinHandle<Result<UsageSnapshot>>,
}

impl MeasurementHandle {
    /// Block until the background cycle has written its snapshot.
    pub fn wait(self) -> Result<UsageSnapshot> {
        self.join.join().map_err(|_| WstError::Runtime {
            details: "measurement thread panicked".to_string(),
        })?
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Clears the in-flight flag when the background cycle ends, even by panic.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl UsageMeasurer {
    #[must_use]
    pub fn new(
        disk_usage: Arc<dyn DiskUsage>,
        store: MetadataStore,
        plan: MeasurePlan,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            disk_usage,
            store,
            plan,
            logger,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Measure every planned dimension and write a fresh snapshot.
    ///
    /// A failed dimension is recorded as unknown; only the write can fail.
    pub fn refresh(&self) -> Result<UsageSnapshot> {
        run_cycle(
            self.disk_usage.as_ref(),
            &self.store,
            &self.plan,
            self.logger.as_ref(),
        )
    }

    /// Start a background cycle unless one is already running.
    pub fn spawn_refresh(&self) -> Option<MeasurementHandle> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        let disk_usage = Arc::clone(&self.disk_usage);
        let store = self.store.clone();
        let plan = self.plan.clone();
        let logger = self.logger.clone();
        let spawned = thread::Builder::new()
            .name("wst-measure".to_string())
            .spawn(move || {
                let _guard = guard;
                let outcome = run_cycle(disk_usage.as_ref(), &store, &plan, logger.as_ref());
                if let Err(error) = &outcome {
                    eprintln!("[WST-MEASURE] background measurement failed: {error}");
                }
                outcome
            });

        match spawned {
            Ok(join) => Some(MeasurementHandle { join }),
            Err(error) => {
                // The closure (and the guard inside it) is dropped, clearing the flag.
                eprintln!("[WST-MEASURE] failed to spawn measurement thread: {error}");
                None
            }
        }
    }
}

fn run_cycle(
    disk_usage: &dyn DiskUsage,
    store: &MetadataStore,
    plan: &MeasurePlan,
    logger: Option<&ActivityLoggerHandle>,
) -> Result<UsageSnapshot> {
    let container_size_kb = plan
        .container
        .as_ref()
        .and_then(|request| measure_one(disk_usage, request, Dimension::Container, logger));
    let workspace_size_kb = plan
        .workspace
        .as_ref()
        .and_then(|request| measure_one(disk_usage, request, Dimension::Workspace, logger));

    let snapshot = UsageSnapshot::now(container_size_kb, workspace_size_kb);
    store.write(&snapshot)?;
    Ok(snapshot)
}

fn measure_one(
    disk_usage: &dyn DiskUsage,
    request: &MeasureRequest,
    dimension: Dimension,
    logger: Option<&ActivityLoggerHandle>,
) -> Option<u64> {
    let started = Instant::now();
    match disk_usage.measure_kb(request) {
        Ok(size_kb) => {
            emit(
                logger,
                ActivityEvent::UsageMeasured {
                    dimension,
                    path: request.path.clone(),
                    size_kb,
                    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                },
            );
            Some(size_kb)
        }
        Err(error) => {
            eprintln!("[WST-MEASURE] {} size unknown: {error}", dimension.as_str());
            emit(
                logger,
                ActivityEvent::MeasurementFailed {
                    dimension,
                    path: request.path.clone(),
                    error_code: error.code().to_string(),
                    error_message: error.to_string(),
                },
            );
            None
        }
    }
}
