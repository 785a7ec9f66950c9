// Resource governor: concurrent-download cap, per-IP request windows and
// bandwidth sharing, persisted to a JSON state file.
//
// All reads and writes of the state go through one mutex. The state file is
// rewritten atomically while the lock is held, so it always reflects a state
// the process actually had.

use crate::config::ResourceConfig;
use crate::constants::{RATE_WINDOW_SECS, STALE_WINDOW_SECS};
use crate::persist::{read_json, write_json_atomic};
use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpWindow {
    pub count: u32,
    /// Unix seconds at which the current window opened
    pub window_start: i64,
}

/// Persisted governor state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceState {
    pub active_downloads: u32,
    pub ip_request_counter: BTreeMap<String, IpWindow>,
    pub last_updated: i64,
}

impl ResourceState {
    /// Read a state file without taking ownership of it
    pub fn read(path: &Path) -> anyhow::Result<Option<Self>> {
        read_json(path)
    }

    /// Drop IP windows that have not been touched for an hour
    fn prune_stale(&mut self, now: i64) {
        self.ip_request_counter
            .retain(|_, window| now - window.window_start <= STALE_WINDOW_SECS);
    }
}

/// Point-in-time view of the governor for status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSnapshot {
    pub enabled: bool,
    pub active_downloads: u32,
    pub max_concurrent_downloads: u32,
    pub max_requests_per_minute: u32,
    pub download_speed_limit: u64,
    pub current_speed_limit: u64,
    pub tracked_ips: usize,
}

pub struct ResourceGovernor {
    config: ResourceConfig,
    path: PathBuf,
    state: Mutex<ResourceState>,
}

impl ResourceGovernor {
    /// Load persisted state, prune it, and take ownership of the download count
    pub fn open(config: &ResourceConfig) -> Self {
        Self::open_at(config, Utc::now().timestamp())
    }

    pub fn open_at(config: &ResourceConfig, now: i64) -> Self {
        let path = config.state_file.clone();
        let mut state = match ResourceState::read(&path) {
            Ok(Some(state)) => state,
            Ok(None) => ResourceState::default(),
            Err(e) => {
                warn!("Discarding unreadable resource state: {}", e);
                ResourceState::default()
            }
        };

        if state.active_downloads > 0 {
            debug!(
                "Resetting {} stale active downloads from a previous run",
                state.active_downloads
            );
        }
        state.active_downloads = 0;
        state.prune_stale(now);

        let governor = Self {
            config: config.clone(),
            path,
            state: Mutex::new(state),
        };
        if governor.config.enabled {
            let mut state = governor.lock();
            governor.save(&mut state, now);
        }
        governor
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, ResourceState> {
        // A panic while holding the lock cannot leave the counters half-written
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Persist under the lock. Failures are logged; in-memory state stays authoritative.
    fn save(&self, state: &mut ResourceState, now: i64) {
        state.last_updated = now;
        if let Err(e) = write_json_atomic(&self.path, &*state) {
            warn!("Failed to persist resource state: {}", e);
        }
    }

    pub fn can_start_download(&self) -> bool {
        if !self.config.enabled {
            return true;
        }
        self.lock().active_downloads < self.config.max_concurrent_downloads
    }

    /// Claim a download slot; returns false and leaves state untouched when the cap is met
    pub fn start_download(&self) -> bool {
        self.start_download_at(Utc::now().timestamp())
    }

    pub fn start_download_at(&self, now: i64) -> bool {
        if !self.config.enabled {
            return true;
        }
        let mut state = self.lock();
        if state.active_downloads >= self.config.max_concurrent_downloads {
            return false;
        }
        state.active_downloads += 1;
        self.save(&mut state, now);
        true
    }

    pub fn end_download(&self) {
        self.end_download_at(Utc::now().timestamp());
    }

    pub fn end_download_at(&self, now: i64) {
        if !self.config.enabled {
            return;
        }
        let mut state = self.lock();
        state.active_downloads = state.active_downloads.saturating_sub(1);
        self.save(&mut state, now);
    }

    /// Claim a slot as a guard that releases it when dropped
    pub fn try_acquire_download(self: &Arc<Self>) -> Option<DownloadPermit> {
        if self.start_download() {
            Some(DownloadPermit {
                governor: Arc::clone(self),
            })
        } else {
            None
        }
    }

    /// Count a request against the caller's window
    ///
    /// The counter is bumped even for requests over the cap, so a client
    /// hammering the mirror keeps its window full.
    pub fn check_ip_request_rate(&self, ip: &str) -> bool {
        self.check_ip_request_rate_at(ip, Utc::now().timestamp())
    }

    pub fn check_ip_request_rate_at(&self, ip: &str, now: i64) -> bool {
        if !self.config.enabled {
            return true;
        }
        let mut state = self.lock();
        state.prune_stale(now);
        let window = state
            .ip_request_counter
            .entry(ip.to_string())
            .or_insert(IpWindow {
                count: 0,
                window_start: now,
            });
        if now - window.window_start >= RATE_WINDOW_SECS {
            *window = IpWindow {
                count: 0,
                window_start: now,
            };
        }
        window.count = window.count.saturating_add(1);
        let count = window.count;
        self.save(&mut state, now);
        count <= self.config.max_requests_per_minute
    }

    /// Bytes per second available to one download right now; 0 means unlimited
    pub fn download_speed_limit(&self) -> u64 {
        if !self.config.enabled || self.config.download_speed_limit == 0 {
            return 0;
        }
        let active = u64::from(self.lock().active_downloads.max(1));
        (self.config.download_speed_limit / active).max(1)
    }

    pub fn active_downloads(&self) -> u32 {
        self.lock().active_downloads
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        let (active, tracked) = {
            let state = self.lock();
            (state.active_downloads, state.ip_request_counter.len())
        };
        ResourceSnapshot {
            enabled: self.config.enabled,
            active_downloads: active,
            max_concurrent_downloads: self.config.max_concurrent_downloads,
            max_requests_per_minute: self.config.max_requests_per_minute,
            download_speed_limit: self.config.download_speed_limit,
            current_speed_limit: self.download_speed_limit(),
            tracked_ips: tracked,
        }
    }
}

/// A claimed download slot, released on drop
pub struct DownloadPermit {
    governor: Arc<ResourceGovernor>,
}

impl DownloadPermit {
    pub fn governor(&self) -> &Arc<ResourceGovernor> {
        &self.governor
    }
}

impl Drop for DownloadPermit {
    fn drop(&mut self) {
        self.governor.end_download();
    }
}

impl std::fmt::Debug for DownloadPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadPermit").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> ResourceConfig {
        ResourceConfig {
            enabled: true,
            max_concurrent_downloads: 2,
            max_requests_per_minute: 5,
            download_speed_limit: 0,
            state_file: dir.path().join("runtime").join("state.json"),
        }
    }

    #[test]
    fn test_rate_window() {
        let dir = TempDir::new().unwrap();
        let governor = ResourceGovernor::open_at(&config(&dir), 1_000);

        let results: Vec<bool> = (0..6)
            .map(|_| governor.check_ip_request_rate_at("1.2.3.4", 1_000))
            .collect();
        assert_eq!(results, vec![true, true, true, true, true, false]);

        assert!(governor.check_ip_request_rate_at("1.2.3.4", 1_061));
    }

    #[test]
    fn test_rate_windows_are_per_ip() {
        let dir = TempDir::new().unwrap();
        let governor = ResourceGovernor::open_at(&config(&dir), 0);
        for _ in 0..6 {
            governor.check_ip_request_rate_at("10.0.0.1", 0);
        }
        assert!(!governor.check_ip_request_rate_at("10.0.0.1", 1));
        assert!(governor.check_ip_request_rate_at("10.0.0.2", 1));
    }

    #[test]
    fn test_over_cap_requests_still_count() {
        let dir = TempDir::new().unwrap();
        let governor = ResourceGovernor::open_at(&config(&dir), 0);
        for _ in 0..8 {
            governor.check_ip_request_rate_at("1.2.3.4", 0);
        }
        let state = ResourceState::read(&config(&dir).state_file).unwrap().unwrap();
        assert_eq!(state.ip_request_counter["1.2.3.4"].count, 8);
    }

    #[test]
    fn test_concurrency_cap() {
        let dir = TempDir::new().unwrap();
        let governor = ResourceGovernor::open_at(&config(&dir), 0);

        assert!(governor.start_download());
        assert!(governor.start_download());
        assert!(!governor.can_start_download());
        assert!(!governor.start_download());
        assert_eq!(governor.active_downloads(), 2);

        governor.end_download();
        assert!(governor.start_download());
        assert_eq!(governor.active_downloads(), 2);
    }

    #[test]
    fn test_end_download_never_goes_negative() {
        let dir = TempDir::new().unwrap();
        let governor = ResourceGovernor::open_at(&config(&dir), 0);
        governor.end_download();
        governor.end_download();
        assert_eq!(governor.active_downloads(), 0);
    }

    #[test]
    fn test_permit_releases_on_drop() {
        let dir = TempDir::new().unwrap();
        let governor = Arc::new(ResourceGovernor::open_at(&config(&dir), 0));

        let first = governor.try_acquire_download().unwrap();
        let second = governor.try_acquire_download().unwrap();
        assert!(governor.try_acquire_download().is_none());

        drop(first);
        assert_eq!(governor.active_downloads(), 1);
        let third = governor.try_acquire_download();
        assert!(third.is_some());

        drop(second);
        drop(third);
        assert_eq!(governor.active_downloads(), 0);
    }

    #[test]
    fn test_speed_limit_is_shared() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.download_speed_limit = 1_000_000;
        let governor = ResourceGovernor::open_at(&cfg, 0);

        assert_eq!(governor.download_speed_limit(), 1_000_000);
        governor.start_download();
        assert_eq!(governor.download_speed_limit(), 1_000_000);
        governor.start_download();
        assert_eq!(governor.download_speed_limit(), 500_000);
    }

    #[test]
    fn test_disabled_governor_admits_everything() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.enabled = false;
        cfg.download_speed_limit = 1_000;
        let governor = ResourceGovernor::open_at(&cfg, 0);

        for _ in 0..10 {
            assert!(governor.check_ip_request_rate_at("1.2.3.4", 0));
            assert!(governor.start_download());
        }
        assert!(governor.can_start_download());
        assert_eq!(governor.download_speed_limit(), 0);
        assert!(!cfg.state_file.exists());
    }

    #[test]
    fn test_open_resets_count_and_prunes_stale_windows() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let mut state = ResourceState {
            active_downloads: 7,
            ..Default::default()
        };
        state.ip_request_counter.insert(
            "1.1.1.1".into(),
            IpWindow {
                count: 3,
                window_start: 10_000 - STALE_WINDOW_SECS - 1,
            },
        );
        state.ip_request_counter.insert(
            "2.2.2.2".into(),
            IpWindow {
                count: 4,
                window_start: 9_990,
            },
        );
        write_json_atomic(&cfg.state_file, &state).unwrap();

        let governor = ResourceGovernor::open_at(&cfg, 10_000);
        assert_eq!(governor.active_downloads(), 0);

        let persisted = ResourceState::read(&cfg.state_file).unwrap().unwrap();
        assert_eq!(persisted.active_downloads, 0);
        assert_eq!(persisted.last_updated, 10_000);
        assert!(!persisted.ip_request_counter.contains_key("1.1.1.1"));
        assert_eq!(persisted.ip_request_counter["2.2.2.2"].count, 4);
    }

    #[test]
    fn test_idle_windows_are_pruned_while_running() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let governor = ResourceGovernor::open_at(&cfg, 0);

        for i in 0..200 {
            governor.check_ip_request_rate_at(&format!("10.0.{}.{}", i / 256, i % 256), 0);
        }
        governor.check_ip_request_rate_at("10.9.9.9", 3_000);
        assert_eq!(governor.snapshot().tracked_ips, 201);

        assert!(governor.check_ip_request_rate_at("192.0.2.1", 4_000));
        assert_eq!(governor.snapshot().tracked_ips, 2);

        let persisted = ResourceState::read(&cfg.state_file).unwrap().unwrap();
        assert_eq!(persisted.ip_request_counter.len(), 2);
        assert!(persisted.ip_request_counter.contains_key("10.9.9.9"));
        assert!(!persisted.ip_request_counter.contains_key("10.0.0.0"));
    }

    #[test]
    fn test_corrupt_state_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        std::fs::create_dir_all(cfg.state_file.parent().unwrap()).unwrap();
        std::fs::write(&cfg.state_file, "{not json").unwrap();

        let governor = ResourceGovernor::open_at(&cfg, 0);
        assert_eq!(governor.snapshot().tracked_ips, 0);
        assert!(governor.check_ip_request_rate_at("1.2.3.4", 0));
    }

    #[test]
    fn test_concurrent_starts_never_exceed_cap() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.max_concurrent_downloads = 3;
        let governor = Arc::new(ResourceGovernor::open_at(&cfg, 0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let governor = Arc::clone(&governor);
                std::thread::spawn(move || governor.start_download())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 3);
        assert_eq!(governor.active_downloads(), 3);
    }
}
