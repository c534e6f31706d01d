//! Persisted disk usage snapshot (`~/.workspace/metadata.json`).

#![allow(missing_docs)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, SubsecRound, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WstError};

/// Last known disk usage. `None` sizes mean unknown, never zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    #[serde(rename = "update_timestamp", with = "timestamp")]
    pub updated_at: NaiveDateTime,
    #[serde(rename = "container_size_in_kb")]
    pub container_size_kb: Option<u64>,
    #[serde(rename = "workspace_folder_size_in_kb")]
    pub workspace_size_kb: Option<u64>,
}

impl UsageSnapshot {
    /// Snapshot stamped with the current local time.
    #[must_use]
    pub fn now(container_size_kb: Option<u64>, workspace_size_kb: Option<u64>) -> Self {
        Self {
            updated_at: local_now(),
            container_size_kb,
            workspace_size_kb,
        }
    }
}

/// Current local wall-clock time without zone, truncated to the microsecond
/// precision the on-disk format keeps.
#[must_use]
pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local().trunc_subsecs(6)
}

mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    const WRITE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
    // `%.f` also accepts a missing fraction.
    const READ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(WRITE_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(raw.trim(), READ_FORMAT).map_err(D::Error::custom)
    }
}

/// Owner of the snapshot file.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the snapshot atomically.
    ///
    /// Each writer uses its own temporary sibling, so concurrent writers never
    /// interleave bytes; the last rename wins.
    pub fn write(&self, snapshot: &UsageSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| WstError::io(parent, source))?;
        }

        let data = serde_json::to_vec_pretty(snapshot)?;
        let tmp_path = self.temp_path();
        let written = fs::File::create(&tmp_path)
            .and_then(|mut file| {
                file.write_all(&data)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp_path, &self.path));
        if let Err(source) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(WstError::io(&self.path, source));
        }
        Ok(())
    }

    /// Current snapshot; missing, unreadable or malformed files read as `None`.
    #[must_use]
    pub fn read(&self) -> Option<UsageSnapshot> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                eprintln!(
                    "[WST-METADATA] ignoring malformed {}: {error}",
                    self.path.display()
                );
                None
            }
        }
    }

    /// Whole minutes since the last measurement.
    ///
    /// `None` when there is no snapshot or its timestamp lies in the future.
    #[must_use]
    pub fn minutes_since_update(&self, now: NaiveDateTime) -> Option<i64> {
        self.read()
            .and_then(|snapshot| elapsed(snapshot.updated_at, now))
            .map(|delta| delta.num_minutes())
    }

    /// Whole days since the last measurement, 0 when unknown.
    #[must_use]
    pub fn days_since_update(&self, now: NaiveDateTime) -> u64 {
        self.read()
            .and_then(|snapshot| elapsed(snapshot.updated_at, now))
            .and_then(|delta| u64::try_from(delta.num_days()).ok())
            .unwrap_or(0)
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "metadata.json".into(), |name| name.to_string_lossy());
        let suffix: u64 = rand::random();
        self.path
            .with_file_name(format!(".{file_name}.{suffix:016x}.tmp"))
    }
}

fn elapsed(then: NaiveDateTime, now: NaiveDateTime) -> Option<TimeDelta> {
    let delta = now.signed_duration_since(then);
    (delta >= TimeDelta::zero()).then_some(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_micro_opt(h, m, 0, 250_000)
            .unwrap()
    }

    fn store_in(dir: &Path) -> MetadataStore {
        MetadataStore::new(dir.join(".workspace").join("metadata.json"))
    }

    #[test]
    fn write_creates_parent_and_uses_wire_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let snapshot = UsageSnapshot {
            updated_at: at(10, 0),
            container_size_kb: Some(11_534_336),
            workspace_size_kb: None,
        };
        store.write(&snapshot).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["update_timestamp"], "2026-03-14 10:00:00.250000");
        assert_eq!(raw["container_size_in_kb"], 11_534_336);
        assert!(raw["workspace_folder_size_in_kb"].is_null());
        assert_eq!(store.read(), Some(snapshot));
    }

    #[test]
    fn fresh_snapshot_reads_back_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let snapshot = UsageSnapshot::now(Some(1), None);
        store.write(&snapshot).unwrap();
        assert_eq!(store.read(), Some(snapshot));
    }

    #[test]
    fn read_accepts_timestamp_without_fraction() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"{"update_timestamp": "2026-03-14 10:00:00", "container_size_in_kb": 5, "workspace_folder_size_in_kb": 7}"#,
        )
        .unwrap();
        let snapshot = store.read().unwrap();
        assert_eq!(snapshot.container_size_kb, Some(5));
        assert_eq!(snapshot.workspace_size_kb, Some(7));
    }

    #[test]
    fn missing_or_corrupt_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert_eq!(store.read(), None);
        assert_eq!(store.minutes_since_update(at(10, 0)), None);

        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{not json").unwrap();
        assert_eq!(store.read(), None);
        assert_eq!(store.days_since_update(at(10, 0)), 0);
    }

    #[test]
    fn minutes_are_not_wrapped_at_an_hour() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .write(&UsageSnapshot {
                updated_at: at(10, 0),
                container_size_kb: None,
                workspace_size_kb: None,
            })
            .unwrap();

        assert_eq!(store.minutes_since_update(at(10, 4)), Some(4));
        assert_eq!(store.minutes_since_update(at(11, 5)), Some(65));
    }

    #[test]
    fn future_timestamp_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .write(&UsageSnapshot {
                updated_at: at(12, 0),
                container_size_kb: None,
                workspace_size_kb: None,
            })
            .unwrap();
        assert_eq!(store.minutes_since_update(at(11, 0)), None);
        assert_eq!(store.days_since_update(at(11, 0)), 0);
    }

    #[test]
    fn days_since_update_counts_whole_days() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .write(&UsageSnapshot {
                updated_at: at(10, 0),
                container_size_kb: None,
                workspace_size_kb: None,
            })
            .unwrap();
        let later = at(9, 0) + TimeDelta::days(3);
        assert_eq!(store.days_since_update(later), 2);
    }

    #[test]
    fn rewrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        for minute in 0..5 {
            store
                .write(&UsageSnapshot {
                    updated_at: at(10, minute),
                    container_size_kb: Some(u64::from(minute)),
                    workspace_size_kb: None,
                })
                .unwrap();
        }
        let entries: Vec<_> = fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(store.read().unwrap().container_size_kb, Some(4));
    }

    #[test]
    fn concurrent_writers_never_tear_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        std::thread::scope(|scope| {
            for writer in 0..8_u64 {
                let store = store.clone();
                scope.spawn(move || {
                    for _ in 0..20 {
                        store
                            .write(&UsageSnapshot::now(Some(writer), Some(writer)))
                            .unwrap();
                    }
                });
            }
        });
        let snapshot = store.read().expect("snapshot should parse");
        assert_eq!(snapshot.container_size_kb, snapshot.workspace_size_kb);
    }
}
