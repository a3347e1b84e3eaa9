//! Core traits and types for the native camera driver abstraction.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// USB attachment point of a camera (e.g., `usb:001,005`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CameraIdentity {
    /// USB bus number.
    pub bus: u32,
    /// USB device number on the bus.
    pub device: u32,
}

impl CameraIdentity {
    /// Create an identity from a bus and device number.
    #[must_use]
    pub const fn new(bus: u32, device: u32) -> Self {
        Self { bus, device }
    }
}

impl fmt::Display for CameraIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "usb:{:03},{:03}", self.bus, self.device)
    }
}

impl FromStr for CameraIdentity {
    type Err = CameraError;

    fn from_str(port: &str) -> Result<Self> {
        let invalid = || CameraError::DeviceNotFound(format!("not a usb port: {port}"));

        let (bus, device) = port
            .strip_prefix("usb:")
            .and_then(|rest| rest.split_once(','))
            .ok_or_else(invalid)?;

        Ok(Self {
            bus: bus.trim().parse().map_err(|_| invalid())?,
            device: device.trim().parse().map_err(|_| invalid())?,
        })
    }
}

/// A supported camera reported by device enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDescriptor {
    /// Where the camera is attached.
    pub identity: CameraIdentity,
    /// Model name as reported by the driver.
    pub model: String,
}

/// Location of a file on the device's storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilePath {
    /// Absolute folder path (e.g., `/DCIM/100CANON`).
    pub folder: String,
    /// File name within the folder.
    pub name: String,
}

impl FilePath {
    /// Create a file path from a folder and a file name.
    #[must_use]
    pub fn new<F: Into<String>, N: Into<String>>(folder: F, name: N) -> Self {
        Self {
            folder: folder.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.folder.trim_end_matches('/'), self.name)
    }
}

/// Contents of one folder on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Subfolder names, in device order.
    pub directories: Vec<String>,
    /// File names, in device order.
    pub files: Vec<String>,
}

/// Access rights the device grants on a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permissions {
    /// File content can be read.
    pub read: bool,
    /// File can be deleted.
    pub delete: bool,
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let read = if self.read { 'r' } else { '-' };
        let delete = if self.delete { 'w' } else { '-' };
        write!(f, "{read}{delete}")
    }
}

/// Metadata for a file on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// File size in bytes, if the device reports it.
    pub size: Option<u64>,
    /// MIME type, if the device reports one.
    pub mimetype: Option<String>,
    /// Image dimensions (width, height), if known.
    pub dimensions: Option<(u32, u32)>,
    /// Last modification time in seconds since the Unix epoch.
    pub mtime: Option<i64>,
    /// Access rights.
    pub permissions: Permissions,
}

/// Physical kind of a storage area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageType {
    /// Not reported or not recognized.
    #[default]
    Unknown,
    /// Built-in read-only memory.
    FixedRom,
    /// Removable read-only media.
    RemovableRom,
    /// Built-in writable memory.
    FixedRam,
    /// Removable writable media, such as a memory card.
    RemovableRam,
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::FixedRom => "fixed_rom",
            Self::RemovableRom => "removable_rom",
            Self::FixedRam => "fixed_ram",
            Self::RemovableRam => "removable_ram",
        })
    }
}

/// What the device allows on a storage area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageAccess {
    /// Files can be read, written and deleted.
    ReadWrite,
    /// Files can only be read.
    ReadOnly,
    /// Files can be read and deleted, but not written.
    ReadDelete,
}

impl fmt::Display for StorageAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReadWrite => "read-write",
            Self::ReadOnly => "read-only",
            Self::ReadDelete => "read-delete",
        })
    }
}

/// One storage area of the device. Fields the device does not report are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageInfo {
    /// Folder the storage is mounted at, e.g. `/store_00010001`.
    pub base_directory: Option<String>,
    /// Volume label.
    pub label: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Physical kind.
    pub storage_type: Option<StorageType>,
    /// Access rights.
    pub access: Option<StorageAccess>,
    /// Total capacity in KiB.
    pub capacity_kb: Option<u64>,
    /// Free space in KiB.
    pub free_kb: Option<u64>,
    /// Estimated number of images that still fit.
    pub free_images: Option<u64>,
}

/// Kind of a configuration node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    /// Group of other settings.
    Section,
    /// One value out of a fixed set of choices.
    Choice,
    /// Free-form text.
    Text,
    /// Number within `{min, max, step}` bounds.
    Range,
    /// On/off switch.
    Toggle,
    /// Point in time.
    Date,
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Section => "section",
            Self::Choice => "choice",
            Self::Text => "text",
            Self::Range => "range",
            Self::Toggle => "toggle",
            Self::Date => "date",
        };
        f.write_str(name)
    }
}

/// Bounds of a range setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Smallest accepted value.
    pub min: f32,
    /// Largest accepted value.
    pub max: f32,
    /// Increment between accepted values; zero means any value.
    pub step: f32,
}

impl Bounds {
    /// Create range bounds.
    #[must_use]
    pub const fn new(min: f32, max: f32, step: f32) -> Self {
        Self { min, max, step }
    }
}

/// A typed value for a leaf setting.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// Selected choice.
    Choice(String),
    /// Text value.
    Text(String),
    /// Numeric value.
    Range(f32),
    /// Switch state.
    Toggle(bool),
    /// Seconds since the Unix epoch.
    Date(i64),
}

impl ConfigValue {
    /// Kind of setting this value can be assigned to.
    #[must_use]
    pub const fn kind(&self) -> ConfigKind {
        match self {
            Self::Choice(_) => ConfigKind::Choice,
            Self::Text(_) => ConfigKind::Text,
            Self::Range(_) => ConfigKind::Range,
            Self::Toggle(_) => ConfigKind::Toggle,
            Self::Date(_) => ConfigKind::Date,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Choice(value) | Self::Text(value) => f.write_str(value),
            Self::Range(value) => write!(f, "{value}"),
            Self::Toggle(value) => write!(f, "{value}"),
            Self::Date(value) => write!(f, "{value}"),
        }
    }
}

/// Kind-specific payload of a setting as reported by the device.
#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    /// Group node; carries no value.
    Section,
    /// Current choice and the accepted choices.
    Choice {
        /// Selected choice.
        current: String,
        /// All accepted choices, in device order.
        choices: Vec<String>,
    },
    /// Current text.
    Text(String),
    /// Current number and its bounds.
    Range {
        /// Current value.
        current: f32,
        /// Accepted bounds.
        bounds: Bounds,
    },
    /// Current switch state.
    Toggle(bool),
    /// Current timestamp.
    Date(i64),
}

impl Setting {
    /// Kind of this setting.
    #[must_use]
    pub const fn kind(&self) -> ConfigKind {
        match self {
            Self::Section => ConfigKind::Section,
            Self::Choice { .. } => ConfigKind::Choice,
            Self::Text(_) => ConfigKind::Text,
            Self::Range { .. } => ConfigKind::Range,
            Self::Toggle(_) => ConfigKind::Toggle,
            Self::Date(_) => ConfigKind::Date,
        }
    }

    /// Current value, or `None` for a section.
    #[must_use]
    pub fn value(&self) -> Option<ConfigValue> {
        match self {
            Self::Section => None,
            Self::Choice { current, .. } => Some(ConfigValue::Choice(current.clone())),
            Self::Text(text) => Some(ConfigValue::Text(text.clone())),
            Self::Range { current, .. } => Some(ConfigValue::Range(*current)),
            Self::Toggle(state) => Some(ConfigValue::Toggle(*state)),
            Self::Date(timestamp) => Some(ConfigValue::Date(*timestamp)),
        }
    }

    /// Replace the current value, keeping choices and bounds.
    ///
    /// The caller must have checked that `value` matches this setting's kind;
    /// mismatched values are ignored.
    pub(crate) fn assign(&mut self, value: ConfigValue) {
        match (self, value) {
            (Self::Choice { current, .. }, ConfigValue::Choice(new))
            | (Self::Text(current), ConfigValue::Text(new)) => *current = new,
            (Self::Range { current, .. }, ConfigValue::Range(new)) => *current = new,
            (Self::Toggle(current), ConfigValue::Toggle(new)) => *current = new,
            (Self::Date(current), ConfigValue::Date(new)) => *current = new,
            _ => {}
        }
    }
}

/// One node of the device's settings namespace, as reported by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigEntry {
    /// Short name, unique among siblings.
    pub name: String,
    /// Human-readable label.
    pub label: String,
    /// Whether the device refuses writes.
    pub readonly: bool,
    /// Kind and current value.
    pub setting: Setting,
}

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// No supported device at the given address.
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    /// The device is in use or still closing.
    #[error("device busy: {0}")]
    DeviceBusy(String),
    /// The device session has been closed.
    #[error("device {0} is closed")]
    DeviceClosed(CameraIdentity),
    /// The borrow token was released, belongs to another device, or outlived its session.
    #[error("borrow token is not valid for this device")]
    InvalidToken,
    /// A close or release that had already happened. Not fatal.
    #[error("redundant operation: {0}")]
    RedundantOperation(&'static str),
    /// No setting with this name or path.
    #[error("no such setting: {0}")]
    NoSuchSetting(String),
    /// Value of the wrong kind for the setting.
    #[error("cannot assign a {found} value to {expected} setting {setting}")]
    InvalidValueForKind {
        /// Setting path.
        setting: String,
        /// Kind of the setting.
        expected: ConfigKind,
        /// Kind of the rejected value.
        found: ConfigKind,
    },
    /// Value outside the setting's bounds or choices.
    #[error("value for {setting} out of range: {reason}")]
    OutOfRange {
        /// Setting path.
        setting: String,
        /// What was violated.
        reason: String,
    },
    /// The device reports the setting as read-only.
    #[error("setting {0} is read-only")]
    ReadOnlySetting(String),
    /// The device rejected a configuration write.
    #[error("failed to write setting {setting}")]
    DeviceWriteFailed {
        /// Setting path.
        setting: String,
        /// Driver error.
        #[source]
        source: Box<CameraError>,
    },
    /// The device could not take a picture.
    #[error("capture failed")]
    CaptureFailed(#[source] Box<CameraError>),
    /// A chunked transfer stopped before the end of the file.
    #[error("transfer of {path} interrupted at offset {offset}")]
    TransferInterrupted {
        /// File being read.
        path: FilePath,
        /// Bytes delivered before the failure.
        offset: u64,
        /// Driver error.
        #[source]
        source: Box<CameraError>,
    },
    /// The driver timed out waiting for the device.
    #[error("device timed out")]
    DeviceTimeout,
    /// Any other driver-reported failure.
    #[error("camera error: {0}")]
    Native(String),
    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    /// Whether the error aborted the operation; only redundant closes and releases are not fatal.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::RedundantOperation(_))
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Device enumeration and opening, supplied by the native layer.
pub trait CameraDriver: Send + Sync {
    /// The per-device handle type.
    type Camera: NativeCamera;

    /// List attached devices the driver supports.
    fn list_supported_devices(&self) -> Result<Vec<CameraDescriptor>>;

    /// Open the device at `identity`.
    fn open(&self, identity: CameraIdentity) -> Result<Self::Camera>;
}

/// Operations on one open device.
///
/// Implementations need not be reentrant: callers serialize every call.
pub trait NativeCamera: Send {
    /// Take a picture and return where the device stored it.
    fn capture(&mut self) -> Result<FilePath>;

    /// Grab one live-view frame.
    fn preview(&mut self) -> Result<Vec<u8>>;

    /// List one folder.
    fn list_directory(&mut self, folder: &str) -> Result<Listing>;

    /// Read file metadata.
    fn file_info(&mut self, path: &FilePath) -> Result<FileInfo>;

    /// Read up to `length` bytes of a file starting at `offset`.
    fn file_data(&mut self, path: &FilePath, offset: u64, length: usize) -> Result<Vec<u8>>;

    /// Delete a file.
    fn delete_file(&mut self, path: &FilePath) -> Result<()>;

    /// Store `data` as a new file.
    fn upload_file(&mut self, path: &FilePath, data: &[u8]) -> Result<()>;

    /// Create folder `name` inside `parent`.
    fn make_directory(&mut self, parent: &str, name: &str) -> Result<()>;

    /// Remove folder `name` from `parent`.
    fn remove_directory(&mut self, parent: &str, name: &str) -> Result<()>;

    /// Read the top-level settings section.
    fn config_root(&mut self) -> Result<ConfigEntry>;

    /// Read the direct children of the section at `path` (empty for the root).
    fn config_children(&mut self, path: &[String]) -> Result<Vec<ConfigEntry>>;

    /// Write one leaf setting.
    fn set_config_value(&mut self, path: &[String], value: &ConfigValue) -> Result<()>;

    /// Model name of the open device.
    fn model(&mut self) -> Result<String>;

    /// Describe each storage area.
    fn storage_info(&mut self) -> Result<Vec<StorageInfo>>;

    /// Release the device. Called exactly once.
    fn close(&mut self) -> Result<()>;
}
