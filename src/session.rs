//! Session manager mapping device identities to live resource guards.
//!
//! The manager guarantees that each physical device is opened through at most
//! one [`ResourceGuard`] at a time, no matter how many consumers ask for it.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::camera::Camera;
use crate::guard::{CloseState, ResourceGuard};
use crate::traits::{CameraDescriptor, CameraDriver, CameraError, CameraIdentity, Result};

/// Thread-safe registry of open camera sessions.
pub struct SessionManager<D: CameraDriver> {
    driver: D,
    sessions: DashMap<CameraIdentity, Arc<ResourceGuard<D::Camera>>>,
}

impl<D: CameraDriver> SessionManager<D> {
    /// Create a manager on top of a native driver.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            sessions: DashMap::new(),
        }
    }

    /// The native driver.
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// List attached supported cameras, ordered by `(bus, device)`.
    pub fn list_cameras(&self) -> Result<Vec<CameraDescriptor>> {
        let mut cameras = self.driver.list_supported_devices()?;
        cameras.sort_by_key(|camera| camera.identity);
        Ok(cameras)
    }

    /// Open the camera with the lowest `(bus, device)` address.
    pub fn open_first_available(&self) -> Result<(CameraIdentity, Camera<D::Camera>)> {
        let first = self
            .list_cameras()?
            .into_iter()
            .next()
            .ok_or_else(|| CameraError::DeviceNotFound("no supported cameras attached".to_owned()))?;

        let camera = self.open(first.identity)?;
        Ok((first.identity, camera))
    }

    /// Borrow the device at `identity`, opening it if no session exists yet.
    ///
    /// The session map's shard lock is held while the driver opens the
    /// device. Other identities that hash to the same shard wait for that
    /// open to finish; identities on other shards proceed.
    pub fn open(&self, identity: CameraIdentity) -> Result<Camera<D::Camera>> {
        // The entry holds the shard lock, so concurrent opens of one identity
        // run one after another and see each other's guard.
        match self.sessions.entry(identity) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_closed() {
                    let guard = self.connect(identity)?;
                    let camera = Camera::acquire(&guard)?;
                    entry.insert(guard);
                    return Ok(camera);
                }

                let guard = entry.get();
                if guard.is_closing() {
                    return Err(CameraError::DeviceBusy(format!(
                        "{identity} is closing; release outstanding borrows first"
                    )));
                }
                debug!(identity = %identity, "reusing open session");
                Camera::acquire(guard)
            }
            Entry::Vacant(entry) => {
                let guard = self.connect(identity)?;
                let camera = Camera::acquire(&guard)?;
                entry.insert(guard);
                Ok(camera)
            }
        }
    }

    /// Request the session for `identity` to close.
    ///
    /// The native handle is released once every outstanding [`Camera`] is
    /// dropped. Closing an unknown or already closed session yields
    /// [`CameraError::RedundantOperation`].
    pub fn close(&self, identity: CameraIdentity) -> Result<CloseState> {
        let Some(guard) = self
            .sessions
            .get(&identity)
            .map(|entry| Arc::clone(entry.value()))
        else {
            warn!(identity = %identity, "close on unknown session");
            return Err(CameraError::RedundantOperation("close"));
        };

        let result = guard.request_close();
        if guard.is_closed() {
            self.sessions
                .remove_if(&identity, |_, current| Arc::ptr_eq(current, &guard));
        }
        result
    }

    /// Whether a session for `identity` is open and accepting borrowers.
    pub fn is_open(&self, identity: CameraIdentity) -> bool {
        self.sessions
            .get(&identity)
            .is_some_and(|guard| !guard.is_closing())
    }

    /// Identities with a session that has not fully closed yet.
    pub fn open_sessions(&self) -> Vec<CameraIdentity> {
        let mut identities: Vec<CameraIdentity> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| *entry.key())
            .collect();
        identities.sort();
        identities
    }

    /// Forget sessions whose native handle has been released.
    pub fn prune(&self) {
        self.sessions.retain(|identity, guard| {
            let keep = !guard.is_closed();
            if !keep {
                debug!(identity = %identity, "pruned closed session");
            }
            keep
        });
    }

    fn connect(&self, identity: CameraIdentity) -> Result<Arc<ResourceGuard<D::Camera>>> {
        let handle = self.driver.open(identity)?;
        info!(identity = %identity, "device opened");
        Ok(Arc::new(ResourceGuard::new(identity, handle)))
    }
}
