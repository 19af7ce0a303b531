//! Platform device discovery is explicitly out of scope (no `idb` /
//! `simctl` / `pymobiledevice3` integration): this trait is the seam where
//! that would plug in, and `StubScanner` is the no-op default so the pool
//! works purely off devices registered via `ensure`/`claim`.

#[derive(Debug, Clone)]
pub struct ScannedDevice {
    pub udid: String,
    pub name: String,
    pub platform: String,
    pub os_version: String,
}

pub trait PlatformScanner: Send + Sync {
    fn scan(&self) -> Vec<ScannedDevice>;
}

pub struct StubScanner;

impl PlatformScanner for StubScanner {
    fn scan(&self) -> Vec<ScannedDevice> {
        Vec::new()
    }
}
