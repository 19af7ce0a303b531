//! Component J — device pool (spec §4.J).
//!
//! A file-locked registry of simulator/device claims, shared across every
//! process that talks to Quern (so two test runners don't grab the same
//! device). `fs2` provides the advisory lock; the registry itself is a
//! small JSON document rewritten atomically on every mutation.

mod scanner;

pub use scanner::{PlatformScanner, StubScanner};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub udid: String,
    pub name: String,
    pub platform: String,
    pub os_version: String,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    devices: HashMap<String, DeviceRecord>,
}

/// Owns the path to the persisted registry; every operation takes the
/// exclusive file lock for its entire read-mutate-write so concurrent
/// daemons (or a daemon and its own CLI) never interleave.
pub struct DevicePool {
    path: PathBuf,
    scanner: Box<dyn PlatformScanner>,
}

impl DevicePool {
    pub fn new(path: PathBuf, scanner: Box<dyn PlatformScanner>) -> Self {
        Self { path, scanner }
    }

    fn with_locked_registry<T>(&self, f: impl FnOnce(&mut Registry) -> AppResult<T>) -> AppResult<T> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Internal(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        file.lock_exclusive().map_err(|e| AppError::Internal(e.to_string()))?;

        let result = (|| {
            let mut registry = read_registry(&file)?;
            let out = f(&mut registry)?;
            write_registry(&self.path, &registry)?;
            Ok(out)
        })();

        fs2::FileExt::unlock(&file).ok();
        result
    }

    /// List every known device, refreshed with a scan if the scanner is
    /// non-stub (`PlatformScanner::scan` is a no-op for the stub).
    pub fn list(&self) -> AppResult<Vec<DeviceRecord>> {
        self.with_locked_registry(|registry| {
            for scanned in self.scanner.scan() {
                registry
                    .devices
                    .entry(scanned.udid.clone())
                    .and_modify(|d| {
                        d.name = scanned.name.clone();
                        d.platform = scanned.platform.clone();
                        d.os_version = scanned.os_version.clone();
                        d.last_seen = Utc::now();
                    })
                    .or_insert(DeviceRecord {
                        udid: scanned.udid.clone(),
                        name: scanned.name.clone(),
                        platform: scanned.platform.clone(),
                        os_version: scanned.os_version.clone(),
                        claimed_by: None,
                        claimed_at: None,
                        last_seen: Utc::now(),
                    });
            }
            Ok(registry.devices.values().cloned().collect())
        })
    }

    /// Claim `udid` for `owner`. Fails with `Conflict` if already claimed
    /// by someone else; re-claiming by the same owner refreshes the claim.
    pub fn claim(&self, udid: &str, owner: &str) -> AppResult<DeviceRecord> {
        self.with_locked_registry(|registry| {
            let record = registry
                .devices
                .get_mut(udid)
                .ok_or_else(|| AppError::NotFound(format!("device {udid}")))?;
            if let Some(existing) = &record.claimed_by {
                if existing != owner {
                    return Err(AppError::Conflict(format!("{udid} already claimed by {existing}")));
                }
            }
            record.claimed_by = Some(owner.to_string());
            record.claimed_at = Some(Utc::now());
            Ok(record.clone())
        })
    }

    /// Release a claim. Releasing an unclaimed or already-released device
    /// is not an error (idempotent, matches spec's "release is best-effort").
    pub fn release(&self, udid: &str, owner: &str) -> AppResult<()> {
        self.with_locked_registry(|registry| {
            if let Some(record) = registry.devices.get_mut(udid) {
                if record.claimed_by.as_deref() == Some(owner) {
                    record.claimed_by = None;
                    record.claimed_at = None;
                }
            }
            Ok(())
        })
    }

    /// Clear claims older than `stale_after` regardless of owner. Returns
    /// the udids released.
    pub fn cleanup(&self, stale_after: chrono::Duration) -> AppResult<Vec<String>> {
        self.with_locked_registry(|registry| {
            let now = Utc::now();
            let mut released = Vec::new();
            for record in registry.devices.values_mut() {
                if let Some(claimed_at) = record.claimed_at {
                    if now - claimed_at > stale_after {
                        record.claimed_by = None;
                        record.claimed_at = None;
                        released.push(record.udid.clone());
                    }
                }
            }
            Ok(released)
        })
    }

    /// Release every claim held by `owner`, regardless of age. Used at
    /// shutdown to best-effort release whatever the daemon itself claimed
    /// (spec §4.B: "release device claims owned by this process").
    pub fn release_owned_by(&self, owner: &str) -> AppResult<Vec<String>> {
        self.with_locked_registry(|registry| {
            let mut released = Vec::new();
            for record in registry.devices.values_mut() {
                if record.claimed_by.as_deref() == Some(owner) {
                    record.claimed_by = None;
                    record.claimed_at = None;
                    released.push(record.udid.clone());
                }
            }
            Ok(released)
        })
    }

    /// Bump `last_seen` for `udid` without touching its claim.
    pub fn refresh(&self, udid: &str) -> AppResult<()> {
        self.with_locked_registry(|registry| {
            let record = registry
                .devices
                .get_mut(udid)
                .ok_or_else(|| AppError::NotFound(format!("device {udid}")))?;
            record.last_seen = Utc::now();
            Ok(())
        })
    }

    /// Resolve a UDID, name, or "booted" alias to a concrete device record.
    pub fn resolve(&self, selector: &str) -> AppResult<DeviceRecord> {
        self.with_locked_registry(|registry| {
            if let Some(record) = registry.devices.get(selector) {
                return Ok(record.clone());
            }
            registry
                .devices
                .values()
                .find(|d| d.name == selector)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("device {selector}")))
        })
    }

    /// Resolve-or-claim in one locked operation: find a free device
    /// matching `platform` (or any, if `None`) and claim it for `owner`.
    pub fn ensure(&self, platform: Option<&str>, owner: &str) -> AppResult<DeviceRecord> {
        self.with_locked_registry(|registry| {
            let candidate = registry
                .devices
                .values_mut()
                .find(|d| d.claimed_by.is_none() && platform.is_none_or(|p| d.platform == p))
                .ok_or_else(|| AppError::PreconditionFailed("no free device matching selector".into()))?;
            candidate.claimed_by = Some(owner.to_string());
            candidate.claimed_at = Some(Utc::now());
            Ok(candidate.clone())
        })
    }
}

fn read_registry(mut file: &File) -> AppResult<Registry> {
    let mut contents = String::new();
    file.read_to_string(&mut contents).map_err(|e| AppError::Internal(e.to_string()))?;
    if contents.trim().is_empty() {
        return Ok(Registry::default());
    }
    serde_json::from_str(&contents).map_err(|e| AppError::Internal(format!("corrupt device pool: {e}")))
}

fn write_registry(path: &Path, registry: &Registry) -> AppResult<()> {
    let tmp_path = path.with_extension("json.tmp");
    let mut f = File::create(&tmp_path).map_err(|e| AppError::Internal(e.to_string()))?;
    f.write_all(serde_json::to_string_pretty(registry).unwrap().as_bytes())
        .map_err(|e| AppError::Internal(e.to_string()))?;
    f.flush().map_err(|e| AppError::Internal(e.to_string()))?;
    std::fs::rename(&tmp_path, path).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanner::StubScanner;
    use tempfile::tempdir;

    fn pool_with(dir: &Path, devices: Vec<DeviceRecord>) -> DevicePool {
        let path = dir.join("device-pool.json");
        let registry = Registry {
            devices: devices.into_iter().map(|d| (d.udid.clone(), d)).collect(),
        };
        write_registry(&path, &registry).unwrap();
        DevicePool::new(path, Box::new(StubScanner))
    }

    fn sample(udid: &str) -> DeviceRecord {
        DeviceRecord {
            udid: udid.to_string(),
            name: "iPhone 15".into(),
            platform: "ios-simulator".into(),
            os_version: "17.4".into(),
            claimed_by: None,
            claimed_at: None,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn claim_then_conflict_for_other_owner() {
        let dir = tempdir().unwrap();
        let pool = pool_with(dir.path(), vec![sample("UDID-1")]);
        pool.claim("UDID-1", "alice").unwrap();
        let err = pool.claim("UDID-1", "bob").unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn release_is_idempotent() {
        let dir = tempdir().unwrap();
        let pool = pool_with(dir.path(), vec![sample("UDID-1")]);
        pool.claim("UDID-1", "alice").unwrap();
        pool.release("UDID-1", "alice").unwrap();
        pool.release("UDID-1", "alice").unwrap();
        let record = pool.resolve("UDID-1").unwrap();
        assert!(record.claimed_by.is_none());
    }

    #[test]
    fn ensure_claims_first_free_matching_platform() {
        let dir = tempdir().unwrap();
        let pool = pool_with(dir.path(), vec![sample("UDID-1")]);
        let record = pool.ensure(Some("ios-simulator"), "alice").unwrap();
        assert_eq!(record.claimed_by.as_deref(), Some("alice"));
    }

    #[test]
    fn release_owned_by_ignores_other_owners() {
        let dir = tempdir().unwrap();
        let pool = pool_with(dir.path(), vec![sample("UDID-1"), sample("UDID-2")]);
        pool.claim("UDID-1", "quernd").unwrap();
        pool.claim("UDID-2", "alice").unwrap();
        let released = pool.release_owned_by("quernd").unwrap();
        assert_eq!(released, vec!["UDID-1".to_string()]);
        assert!(pool.resolve("UDID-2").unwrap().claimed_by.is_some());
    }

    #[test]
    fn cleanup_clears_stale_claims_only() {
        let dir = tempdir().unwrap();
        let mut stale = sample("UDID-1");
        stale.claimed_by = Some("alice".into());
        stale.claimed_at = Some(Utc::now() - chrono::Duration::hours(2));
        let pool = pool_with(dir.path(), vec![stale]);
        let released = pool.cleanup(chrono::Duration::minutes(30)).unwrap();
        assert_eq!(released, vec!["UDID-1".to_string()]);
    }
}
