//! Mock driver implementation for testing without hardware.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::fs::join_path;
use crate::traits::{
    Bounds, CameraDescriptor, CameraDriver, CameraError, CameraIdentity, ConfigEntry, ConfigValue,
    FileInfo, FilePath, Listing, NativeCamera, Permissions, Result, Setting, StorageAccess,
    StorageInfo, StorageType,
};

/// Folder the mock stores captured images in.
pub const CAPTURE_FOLDER: &str = "/store_00010001/DCIM/100MOCK";

/// How reads fail once the configured number of chunks has been served.
#[derive(Debug, Clone, Copy)]
pub enum ReadFailure {
    /// The device vanished from the bus.
    Disconnect,
    /// The device stopped answering.
    Timeout,
}

/// A node of the mock settings tree.
#[derive(Debug, Clone)]
pub struct MockSetting {
    entry: ConfigEntry,
    children: Vec<MockSetting>,
}

impl MockSetting {
    /// Create a section holding `children`.
    #[must_use]
    pub fn section(name: &str, children: Vec<Self>) -> Self {
        Self {
            entry: ConfigEntry {
                name: name.to_owned(),
                label: name.to_owned(),
                readonly: false,
                setting: Setting::Section,
            },
            children,
        }
    }

    /// Create a writable leaf.
    #[must_use]
    pub fn leaf(name: &str, setting: Setting) -> Self {
        Self {
            entry: ConfigEntry {
                name: name.to_owned(),
                label: name.to_owned(),
                readonly: false,
                setting,
            },
            children: Vec::new(),
        }
    }

    /// Mark this setting read-only.
    #[must_use]
    pub const fn readonly(mut self) -> Self {
        self.entry.readonly = true;
        self
    }

    fn find(&self, path: &[String]) -> Option<&Self> {
        path.iter()
            .try_fold(self, |node, name| node.children.iter().find(|c| c.entry.name == *name))
    }

    fn find_mut(&mut self, path: &[String]) -> Option<&mut Self> {
        let mut node = self;
        for name in path {
            node = node.children.iter_mut().find(|c| c.entry.name == *name)?;
        }
        Some(node)
    }
}

/// Settings tree shaped like a typical DSLR's.
#[must_use]
pub fn default_config() -> MockSetting {
    MockSetting::section(
        "main",
        vec![
            MockSetting::section(
                "settings",
                vec![
                    MockSetting::leaf("datetime", Setting::Date(1_700_000_000)),
                    MockSetting::leaf(
                        "capturetarget",
                        Setting::Choice {
                            current: "Internal RAM".to_owned(),
                            choices: vec!["Internal RAM".to_owned(), "Memory card".to_owned()],
                        },
                    ),
                    MockSetting::leaf("artist", Setting::Text(String::new())),
                ],
            ),
            MockSetting::section(
                "imgsettings",
                vec![MockSetting::leaf(
                    "iso",
                    Setting::Choice {
                        current: "100".to_owned(),
                        choices: ["Auto", "100", "200", "400", "800"]
                            .iter()
                            .map(|c| (*c).to_owned())
                            .collect(),
                    },
                )],
            ),
            MockSetting::section(
                "capturesettings",
                vec![
                    MockSetting::leaf(
                        "exposurecompensation",
                        Setting::Range {
                            current: 0.0,
                            bounds: Bounds::new(-3.0, 3.0, 0.5),
                        },
                    ),
                    MockSetting::leaf(
                        "zoom",
                        Setting::Range {
                            current: 10.0,
                            bounds: Bounds::new(0.0, 100.0, 1.0),
                        },
                    ),
                ],
            ),
            MockSetting::section(
                "actions",
                vec![MockSetting::leaf("autofocusdrive", Setting::Toggle(false))],
            ),
            MockSetting::section(
                "status",
                vec![
                    MockSetting::leaf("serialnumber", Setting::Text("0123456789".to_owned()))
                        .readonly(),
                    MockSetting::leaf("batterylevel", Setting::Text("100%".to_owned())).readonly(),
                    MockSetting::leaf("d402", Setting::Text("Mock".to_owned())).readonly(),
                ],
            ),
        ],
    )
}

#[derive(Debug, Default)]
struct Folder {
    directories: Vec<String>,
    files: Vec<(String, Vec<u8>)>,
}

/// Counts native calls that are running at the same time.
///
/// Lives outside the state mutex so overlapping calls are observable.
#[derive(Debug, Default)]
struct CallTracker {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    total: AtomicUsize,
    delay_us: AtomicU64,
}

impl CallTracker {
    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_us.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_micros(delay));
        }
        InFlight(self)
    }
}

struct InFlight<'a>(&'a CallTracker);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn default_storage() -> Vec<StorageInfo> {
    vec![StorageInfo {
        base_directory: Some("/store_00010001".to_owned()),
        label: Some("MOCK_CARD".to_owned()),
        description: Some("SD".to_owned()),
        storage_type: Some(StorageType::RemovableRam),
        access: Some(StorageAccess::ReadWrite),
        capacity_kb: Some(31_166_976),
        free_kb: Some(30_000_000),
        free_images: Some(4_512),
    }]
}

#[derive(Debug)]
struct DeviceState {
    model: String,
    busy: bool,
    report_sizes: bool,
    storage: Vec<StorageInfo>,
    folders: BTreeMap<String, Folder>,
    config: MockSetting,
    capture_error: Option<String>,
    write_error: Option<String>,
    read_failure: Option<(usize, ReadFailure)>,
    reads: usize,
    captures: u32,
    previews: u32,
    closes: usize,
    config_fetches: usize,
}

impl DeviceState {
    fn ensure_folder(&mut self, path: &str) {
        if self.folders.contains_key(path) {
            return;
        }
        if let Some((parent, name)) = split_path(path) {
            self.ensure_folder(&parent);
            if let Some(folder) = self.folders.get_mut(&parent) {
                folder.directories.push(name);
            }
        }
        self.folders.insert(path.to_owned(), Folder::default());
    }

    fn file(&self, path: &FilePath) -> Result<&Vec<u8>> {
        self.folders
            .get(&path.folder)
            .and_then(|folder| folder.files.iter().find(|(name, _)| *name == path.name))
            .map(|(_, data)| data)
            .ok_or_else(|| CameraError::Native(format!("file not found: {path}")))
    }
}

fn split_path(path: &str) -> Option<(String, String)> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = trimmed.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    let parent = if parent.is_empty() { "/" } else { parent };
    Some((parent.to_owned(), name.to_owned()))
}

/// Shared state of one simulated camera.
///
/// Clones observe the same device, so tests keep a `MockDevice` while the
/// session layer owns the [`MockCamera`] handle.
#[derive(Debug, Clone)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
    calls: Arc<CallTracker>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create an empty device with the default settings tree.
    #[must_use]
    pub fn new() -> Self {
        let mut folders = BTreeMap::new();
        folders.insert("/".to_owned(), Folder::default());
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                model: "Mock Camera".to_owned(),
                busy: false,
                report_sizes: true,
                storage: default_storage(),
                folders,
                config: default_config(),
                capture_error: None,
                write_error: None,
                read_failure: None,
                reads: 0,
                captures: 0,
                previews: 0,
                closes: 0,
                config_fetches: 0,
            })),
            calls: Arc::new(CallTracker::default()),
        }
    }

    /// Set the model name.
    #[must_use]
    pub fn with_model(self, model: &str) -> Self {
        self.state().model = model.to_owned();
        self
    }

    /// Refuse to open, as if another process holds the device.
    #[must_use]
    pub fn busy(self) -> Self {
        self.state().busy = true;
        self
    }

    /// Add an (empty) folder and its ancestors.
    #[must_use]
    pub fn with_directory(self, path: &str) -> Self {
        self.state().ensure_folder(path);
        self
    }

    /// Add a file, creating its folder if needed.
    #[must_use]
    pub fn with_file(self, folder: &str, name: &str, data: &[u8]) -> Self {
        {
            let mut state = self.state();
            state.ensure_folder(folder);
            if let Some(entry) = state.folders.get_mut(folder) {
                entry.files.push((name.to_owned(), data.to_vec()));
            }
        }
        self
    }

    /// Leave file sizes out of file metadata, as some drivers do.
    #[must_use]
    pub fn without_file_sizes(self) -> Self {
        self.state().report_sizes = false;
        self
    }

    /// Replace the storage descriptions.
    #[must_use]
    pub fn with_storage(self, storage: Vec<StorageInfo>) -> Self {
        self.state().storage = storage;
        self
    }

    /// Make every native call take at least `delay`.
    #[must_use]
    pub fn with_call_delay(self, delay: Duration) -> Self {
        let micros = u64::try_from(delay.as_micros()).unwrap_or(u64::MAX);
        self.calls.delay_us.store(micros, Ordering::SeqCst);
        self
    }

    /// Replace the settings tree.
    #[must_use]
    pub fn with_config(self, config: MockSetting) -> Self {
        self.state().config = config;
        self
    }

    /// Make every capture fail with `message`.
    #[must_use]
    pub fn with_capture_error(self, message: &str) -> Self {
        self.state().capture_error = Some(message.to_owned());
        self
    }

    /// Make configuration writes fail with `message`, or succeed again with `None`.
    pub fn set_write_error(&self, message: Option<&str>) {
        self.state().write_error = message.map(str::to_owned);
    }

    /// Serve `chunks` file reads, then fail every read.
    pub fn fail_reads_after(&self, chunks: usize, failure: ReadFailure) {
        let mut state = self.state();
        state.reads = 0;
        state.read_failure = Some((chunks, failure));
    }

    /// Create a handle, as the native layer does on open.
    #[must_use]
    pub fn handle(&self) -> MockCamera {
        MockCamera {
            state: Arc::clone(&self.state),
            calls: Arc::clone(&self.calls),
        }
    }

    /// Highest number of native calls seen running at once.
    pub fn max_in_flight(&self) -> usize {
        self.calls.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of native calls served.
    pub fn call_count(&self) -> usize {
        self.calls.total.load(Ordering::SeqCst)
    }

    /// Number of times a handle to this device was closed.
    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    /// Total number of files on the device.
    pub fn file_count(&self) -> usize {
        self.state().folders.values().map(|f| f.files.len()).sum()
    }

    /// Whether a folder exists.
    pub fn has_directory(&self, path: &str) -> bool {
        self.state().folders.contains_key(path)
    }

    /// Number of settings fetches (root plus children) served.
    pub fn config_fetches(&self) -> usize {
        self.state().config_fetches
    }

    /// Current device-side value of a leaf setting.
    pub fn config_value(&self, path: &[&str]) -> Option<ConfigValue> {
        let path: Vec<String> = path.iter().map(|p| (*p).to_owned()).collect();
        self.state()
            .config
            .find(&path)
            .and_then(|node| node.entry.setting.value())
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Native handle to a [`MockDevice`].
#[derive(Debug)]
pub struct MockCamera {
    state: Arc<Mutex<DeviceState>>,
    calls: Arc<CallTracker>,
}

impl MockCamera {
    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NativeCamera for MockCamera {
    fn capture(&mut self) -> Result<FilePath> {
        let _call = self.calls.enter();
        let mut state = self.state();
        if let Some(message) = &state.capture_error {
            return Err(CameraError::Native(message.clone()));
        }
        state.captures += 1;
        let seq = state.captures;
        let name = format!("IMG_{seq:04}.JPG");

        let mut data = vec![0xFF, 0xD8];
        data.extend_from_slice(&seq.to_be_bytes());
        data.extend_from_slice(&[0xFF, 0xD9]);

        state.ensure_folder(CAPTURE_FOLDER);
        if let Some(folder) = state.folders.get_mut(CAPTURE_FOLDER) {
            folder.files.push((name.clone(), data));
        }
        Ok(FilePath::new(CAPTURE_FOLDER, name))
    }

    fn preview(&mut self) -> Result<Vec<u8>> {
        let _call = self.calls.enter();
        let mut state = self.state();
        state.previews += 1;
        let mut frame = vec![0xFF, 0xD8];
        frame.extend_from_slice(&state.previews.to_be_bytes());
        frame.extend_from_slice(&[0xFF, 0xD9]);
        Ok(frame)
    }

    fn list_directory(&mut self, folder: &str) -> Result<Listing> {
        let _call = self.calls.enter();
        let state = self.state();
        let entry = state
            .folders
            .get(folder)
            .ok_or_else(|| CameraError::Native(format!("directory not found: {folder}")))?;
        Ok(Listing {
            directories: entry.directories.clone(),
            files: entry.files.iter().map(|(name, _)| name.clone()).collect(),
        })
    }

    fn file_info(&mut self, path: &FilePath) -> Result<FileInfo> {
        let _call = self.calls.enter();
        let state = self.state();
        let data = state.file(path)?;
        let mimetype = std::path::Path::new(&path.name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg"))
            .then(|| "image/jpeg".to_owned());
        Ok(FileInfo {
            size: state.report_sizes.then_some(data.len() as u64),
            mimetype,
            dimensions: None,
            mtime: Some(1_700_000_000),
            permissions: Permissions {
                read: true,
                delete: true,
            },
        })
    }

    fn file_data(&mut self, path: &FilePath, offset: u64, length: usize) -> Result<Vec<u8>> {
        let _call = self.calls.enter();
        let mut state = self.state();
        if let Some((limit, failure)) = state.read_failure {
            if state.reads >= limit {
                return Err(match failure {
                    ReadFailure::Disconnect => {
                        CameraError::Native("I/O problem: device disconnected".to_owned())
                    }
                    ReadFailure::Timeout => CameraError::DeviceTimeout,
                });
            }
        }
        state.reads += 1;

        let data = state.file(path)?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(length).min(data.len());
        Ok(data.get(start..end).map(<[u8]>::to_vec).unwrap_or_default())
    }

    fn delete_file(&mut self, path: &FilePath) -> Result<()> {
        let _call = self.calls.enter();
        let mut state = self.state();
        let folder = state
            .folders
            .get_mut(&path.folder)
            .ok_or_else(|| CameraError::Native(format!("directory not found: {}", path.folder)))?;
        let before = folder.files.len();
        folder.files.retain(|(name, _)| *name != path.name);
        if folder.files.len() == before {
            return Err(CameraError::Native(format!("file not found: {path}")));
        }
        Ok(())
    }

    fn upload_file(&mut self, path: &FilePath, data: &[u8]) -> Result<()> {
        let _call = self.calls.enter();
        let mut state = self.state();
        let folder = state
            .folders
            .get_mut(&path.folder)
            .ok_or_else(|| CameraError::Native(format!("directory not found: {}", path.folder)))?;
        if folder.files.iter().any(|(name, _)| *name == path.name) {
            return Err(CameraError::Native(format!("file exists: {path}")));
        }
        folder.files.push((path.name.clone(), data.to_vec()));
        Ok(())
    }

    fn make_directory(&mut self, parent: &str, name: &str) -> Result<()> {
        let _call = self.calls.enter();
        let mut state = self.state();
        if !state.folders.contains_key(parent) {
            return Err(CameraError::Native(format!("directory not found: {parent}")));
        }
        let path = join_path(parent, name);
        if state.folders.contains_key(&path) {
            return Err(CameraError::Native(format!("directory exists: {path}")));
        }
        state.ensure_folder(&path);
        Ok(())
    }

    fn remove_directory(&mut self, parent: &str, name: &str) -> Result<()> {
        let _call = self.calls.enter();
        let mut state = self.state();
        let path = join_path(parent, name);
        let empty = state
            .folders
            .get(&path)
            .map(|f| f.directories.is_empty() && f.files.is_empty())
            .ok_or_else(|| CameraError::Native(format!("directory not found: {path}")))?;
        if !empty {
            return Err(CameraError::Native(format!("directory not empty: {path}")));
        }
        state.folders.remove(&path);
        if let Some(folder) = state.folders.get_mut(parent) {
            folder.directories.retain(|d| d != name);
        }
        Ok(())
    }

    fn config_root(&mut self) -> Result<ConfigEntry> {
        let _call = self.calls.enter();
        let mut state = self.state();
        state.config_fetches += 1;
        Ok(state.config.entry.clone())
    }

    fn config_children(&mut self, path: &[String]) -> Result<Vec<ConfigEntry>> {
        let _call = self.calls.enter();
        let mut state = self.state();
        state.config_fetches += 1;
        let node = state
            .config
            .find(path)
            .ok_or_else(|| CameraError::Native(format!("no widget at /{}", path.join("/"))))?;
        if node.entry.setting != Setting::Section {
            return Err(CameraError::Native(format!("/{} is not a section", path.join("/"))));
        }
        Ok(node.children.iter().map(|c| c.entry.clone()).collect())
    }

    fn set_config_value(&mut self, path: &[String], value: &ConfigValue) -> Result<()> {
        let _call = self.calls.enter();
        let mut state = self.state();
        if let Some(message) = &state.write_error {
            return Err(CameraError::Native(message.clone()));
        }
        let node = state
            .config
            .find_mut(path)
            .ok_or_else(|| CameraError::Native(format!("no widget at /{}", path.join("/"))))?;
        if node.entry.readonly {
            return Err(CameraError::Native("widget is read-only".to_owned()));
        }
        node.entry.setting.assign(value.clone());
        Ok(())
    }

    fn model(&mut self) -> Result<String> {
        let _call = self.calls.enter();
        Ok(self.state().model.clone())
    }

    fn storage_info(&mut self) -> Result<Vec<StorageInfo>> {
        let _call = self.calls.enter();
        Ok(self.state().storage.clone())
    }

    fn close(&mut self) -> Result<()> {
        let _call = self.calls.enter();
        self.state().closes += 1;
        Ok(())
    }
}

/// Mock driver serving a fixed set of [`MockDevice`]s.
#[derive(Debug, Default)]
pub struct MockDriver {
    devices: Vec<(CameraIdentity, MockDevice)>,
    opens: Mutex<HashMap<CameraIdentity, usize>>,
}

impl MockDriver {
    /// Create a driver with no devices attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `device` at `identity`.
    #[must_use]
    pub fn with_device(mut self, identity: CameraIdentity, device: MockDevice) -> Self {
        self.devices.push((identity, device));
        self
    }

    /// Number of successful opens of `identity`.
    pub fn open_count(&self, identity: CameraIdentity) -> usize {
        self.opens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&identity)
            .copied()
            .unwrap_or(0)
    }
}

impl CameraDriver for MockDriver {
    type Camera = MockCamera;

    fn list_supported_devices(&self) -> Result<Vec<CameraDescriptor>> {
        Ok(self
            .devices
            .iter()
            .map(|(identity, device)| CameraDescriptor {
                identity: *identity,
                model: device.state().model.clone(),
            })
            .collect())
    }

    fn open(&self, identity: CameraIdentity) -> Result<MockCamera> {
        let device = self
            .devices
            .iter()
            .find(|(id, _)| *id == identity)
            .map(|(_, device)| device)
            .ok_or_else(|| CameraError::DeviceNotFound(identity.to_string()))?;
        if device.state().busy {
            return Err(CameraError::DeviceBusy(identity.to_string()));
        }

        // USB initialization is slow; widen the window for racing opens.
        std::thread::sleep(Duration::from_millis(5));
        *self
            .opens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(identity)
            .or_insert(0) += 1;
        Ok(device.handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        let mut camera = device.handle();
        let listing = camera.list_directory("/").expect("list_directory should succeed");
        assert!(listing.directories.is_empty());
        assert!(listing.files.is_empty());
        assert_eq!(device.file_count(), 0);
    }

    #[test]
    fn test_mock_nested_folders() {
        let device = MockDevice::new().with_file("/DCIM/100", "a.jpg", b"abc");
        let mut camera = device.handle();

        let root = camera.list_directory("/").expect("list_directory should succeed");
        assert_eq!(root.directories, vec!["DCIM".to_owned()]);
        let dcim = camera.list_directory("/DCIM").expect("list_directory should succeed");
        assert_eq!(dcim.directories, vec!["100".to_owned()]);
        let leaf = camera.list_directory("/DCIM/100").expect("list_directory should succeed");
        assert_eq!(leaf.files, vec!["a.jpg".to_owned()]);
    }

    #[test]
    fn test_mock_file_data_ranges() {
        let device = MockDevice::new().with_file("/", "f.bin", b"0123456789");
        let mut camera = device.handle();
        let path = FilePath::new("/", "f.bin");

        assert_eq!(camera.file_data(&path, 8, 4).expect("read should succeed"), b"89");
        assert!(camera.file_data(&path, 20, 4).expect("read should succeed").is_empty());
    }

    #[test]
    fn test_mock_config_children() {
        let device = MockDevice::new();
        let mut camera = device.handle();
        let root = camera.config_root().expect("config_root should succeed");
        assert_eq!(root.name, "main");

        let sections = camera.config_children(&[]).expect("config_children should succeed");
        assert_eq!(sections.first().map(|s| s.name.as_str()), Some("settings"));
        assert!(camera.config_children(&["nope".to_owned()]).is_err());
        assert_eq!(device.config_fetches(), 3);
    }

    #[test]
    fn test_mock_driver_open_counts() {
        let identity = CameraIdentity::new(1, 1);
        let driver = MockDriver::new().with_device(identity, MockDevice::new());
        assert_eq!(driver.open_count(identity), 0);
        driver.open(identity).expect("open should succeed");
        assert_eq!(driver.open_count(identity), 1);
    }
}
