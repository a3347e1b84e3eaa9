//! gphoto-session: session and resource-lifetime management for libgphoto2 cameras
//!
//! This library mediates between one shared native camera handle and any number
//! of concurrent consumers (capture, preview, file browsing, configuration),
//! closing each handle exactly once after its last borrower lets go. Native
//! access goes through the [`traits::CameraDriver`] and [`traits::NativeCamera`]
//! traits, so everything runs against the mock driver in tests and against
//! libgphoto2 with the `gphoto2` feature.

pub mod camera;
pub mod config;
#[cfg(feature = "gphoto2")]
pub mod device;
pub mod fs;
pub mod guard;
pub mod session;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use camera::{Camera, CaptureTarget};
pub use config::{ConfigNode, ConfigTree};
#[cfg(feature = "gphoto2")]
pub use device::{GPhotoCamera, GPhotoDriver};
pub use fs::{DirectoryEntry, FileEntry, DEFAULT_CHUNK_SIZE};
pub use guard::{BorrowToken, CloseState, ResourceGuard};
pub use session::SessionManager;
pub use traits::{
    CameraDescriptor, CameraDriver, CameraError, CameraIdentity, ConfigKind, ConfigValue,
    FileInfo, FilePath, NativeCamera, Result, StorageAccess, StorageInfo, StorageType,
};
