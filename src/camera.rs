//! Borrowed handle to an open camera session.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ConfigTree;
use crate::fs::{FileEntry, DEFAULT_CHUNK_SIZE};
use crate::guard::{BorrowToken, ResourceGuard};
use crate::traits::{CameraError, CameraIdentity, ConfigValue, NativeCamera, Result, StorageInfo};

const CAPTURE_TARGET_SETTING: &str = "settings/capturetarget";

/// Where the device stores a new capture.
///
/// Mostly Canon and Nikon bodies support capturing to internal RAM; on other
/// devices the setting does not exist and captures go to the card either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTarget {
    /// Volatile memory inside the camera.
    InternalRam,
    /// The memory card.
    MemoryCard,
}

impl CaptureTarget {
    /// Choice string the device uses for this target.
    #[must_use]
    pub const fn choice(self) -> &'static str {
        match self {
            Self::InternalRam => "Internal RAM",
            Self::MemoryCard => "Memory card",
        }
    }
}

/// A consumer's claim on an open device.
///
/// Every operation locks the device for one native round-trip. Dropping the
/// `Camera` releases its borrow token.
pub struct Camera<C: NativeCamera> {
    guard: Arc<ResourceGuard<C>>,
    token: BorrowToken,
    released: bool,
}

impl<C: NativeCamera> Camera<C> {
    /// Take a claim on `guard`, failing if it is closed or closing.
    pub fn acquire(guard: &Arc<ResourceGuard<C>>) -> Result<Self> {
        let token = guard.acquire()?;
        Ok(Self {
            guard: Arc::clone(guard),
            token,
            released: false,
        })
    }

    /// Device this handle borrows.
    #[must_use]
    pub fn identity(&self) -> CameraIdentity {
        self.guard.identity()
    }

    /// Borrow token held by this handle.
    #[must_use]
    pub const fn token(&self) -> BorrowToken {
        self.token
    }

    /// Identifier of the underlying guard; equal ids mean the same native handle.
    #[must_use]
    pub fn guard_id(&self) -> u64 {
        self.guard.id()
    }

    /// Take another claim on the same device.
    pub fn try_clone(&self) -> Result<Self> {
        Self::acquire(&self.guard)
    }

    /// Release the borrow token now instead of on drop.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.guard.release(&self.token)
    }

    /// Model name reported by the open device.
    pub fn model_name(&self) -> Result<String> {
        self.run(|camera| camera.model())
    }

    /// Describe each storage area of the device.
    pub fn storage_info(&self) -> Result<Vec<StorageInfo>> {
        self.run(|camera| camera.storage_info())
    }

    /// Trigger an exposure and return the stored image.
    ///
    /// The image lands wherever the device's capture target currently points.
    /// Device-side failures (lens cap, autofocus) are reported as
    /// [`CameraError::CaptureFailed`].
    pub fn capture(&self) -> Result<FileEntry> {
        let path = self.run(|camera| camera.capture()).map_err(|err| match err {
            CameraError::DeviceTimeout
            | CameraError::DeviceClosed(_)
            | CameraError::InvalidToken => err,
            other => CameraError::CaptureFailed(Box::new(other)),
        })?;
        debug!(identity = %self.identity(), path = %path, "captured");
        Ok(FileEntry::detached(path))
    }

    /// Point the capture target at `target`, then capture.
    pub fn capture_to(&self, target: CaptureTarget) -> Result<FileEntry> {
        self.select_capture_target(target)?;
        self.capture()
    }

    /// Capture into internal RAM, download the image, and delete it from the device.
    pub fn capture_to_memory(&self) -> Result<Vec<u8>> {
        let file = self.capture_to(CaptureTarget::InternalRam)?;
        let data = file.read_all(self, DEFAULT_CHUNK_SIZE)?;
        if let Err(err) = file.remove(self) {
            // Images captured to RAM may already be gone.
            warn!(path = %file.path(), error = %err, "could not delete captured image");
        }
        Ok(data)
    }

    /// Grab one live-view frame; call repeatedly for a live-view loop.
    pub fn preview(&self) -> Result<Vec<u8>> {
        self.run(|camera| camera.preview())
    }

    fn select_capture_target(&self, target: CaptureTarget) -> Result<()> {
        let mut tree = ConfigTree::new();
        let node = match tree.lookup(self, CAPTURE_TARGET_SETTING) {
            Ok(node) => node,
            Err(CameraError::NoSuchSetting(_)) => {
                debug!(identity = %self.identity(), "device has no capture target setting");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let wanted = ConfigValue::Choice(target.choice().to_owned());
        if node.get().as_ref() == Some(&wanted) {
            return Ok(());
        }
        node.set(self, wanted)?;
        info!(identity = %self.identity(), target = target.choice(), "capture target changed");
        Ok(())
    }

    pub(crate) fn run<T, F>(&self, call: F) -> Result<T>
    where
        F: FnOnce(&mut C) -> Result<T>,
    {
        self.guard.with_handle(&self.token, call)
    }
}

impl<C: NativeCamera> fmt::Debug for Camera<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Camera")
            .field("identity", &self.identity())
            .field("token", &self.token.id())
            .finish_non_exhaustive()
    }
}

impl<C: NativeCamera> Drop for Camera<C> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.guard.release(&self.token) {
                warn!(
                    identity = %self.identity(),
                    token = self.token.id(),
                    error = %err,
                    "release on drop failed"
                );
            }
        }
    }
}
