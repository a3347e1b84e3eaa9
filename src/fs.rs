//! Lazy view of the device's storage.
//!
//! Directories and files are materialized from listings on demand and never
//! cached between traversals. Entries refer to their parent weakly; their own
//! path is stored, so an entry stays usable after its parent is dropped.

use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::iter::FusedIterator;
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};

use tracing::debug;

use crate::camera::Camera;
use crate::traits::{CameraError, FileInfo, FilePath, NativeCamera, Result};

/// Default chunk size for content reads (64KB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Join a folder path and an entry name.
pub(crate) fn join_path(folder: &str, name: &str) -> String {
    format!("{}/{name}", folder.trim_end_matches('/'))
}

/// A folder on the device.
#[derive(Debug)]
pub struct DirectoryEntry {
    name: String,
    path: String,
    parent: Option<Weak<DirectoryEntry>>,
}

impl DirectoryEntry {
    /// The root folder (`/`).
    #[must_use]
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            name: String::new(),
            path: "/".to_owned(),
            parent: None,
        })
    }

    fn child(self: &Arc<Self>, name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            path: join_path(&self.path, name),
            parent: Some(Arc::downgrade(self)),
        })
    }

    /// Folder name; empty for the root.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path on the device.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this is the root folder.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Enclosing folder, if this is not the root and it is still alive.
    ///
    /// Folders yielded by [`Camera::list_files`] and [`Camera::list_directories`]
    /// keep their ancestors alive while the walk is running; afterwards the
    /// chain lasts only as long as the caller holds it.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Self>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Files directly inside this folder.
    pub fn files<C: NativeCamera>(self: &Arc<Self>, camera: &Camera<C>) -> Result<Vec<FileEntry>> {
        Ok(self.listing(camera)?.1)
    }

    /// Folders directly inside this folder.
    pub fn directories<C: NativeCamera>(
        self: &Arc<Self>,
        camera: &Camera<C>,
    ) -> Result<Vec<Arc<Self>>> {
        Ok(self.listing(camera)?.0)
    }

    /// Whether the folder is still present on the device.
    pub fn exists<C: NativeCamera>(&self, camera: &Camera<C>) -> Result<bool> {
        let Some((parent, name)) = self.split() else {
            return Ok(true);
        };
        let listing = camera.run(|native| native.list_directory(parent))?;
        Ok(listing.directories.iter().any(|dir| dir == name))
    }

    /// Create a subfolder.
    pub fn create_directory<C: NativeCamera>(
        self: &Arc<Self>,
        camera: &Camera<C>,
        name: &str,
    ) -> Result<Arc<Self>> {
        camera.run(|native| native.make_directory(&self.path, name))?;
        debug!(parent = %self.path, name, "created directory");
        Ok(self.child(name))
    }

    /// Remove this (empty) folder from the device.
    pub fn remove<C: NativeCamera>(&self, camera: &Camera<C>) -> Result<()> {
        let (parent, name) = self
            .split()
            .ok_or_else(|| CameraError::Native("cannot remove the root directory".to_owned()))?;
        camera.run(|native| native.remove_directory(parent, name))
    }

    /// Store `data` as a new file in this folder.
    pub fn upload<C: NativeCamera>(
        self: &Arc<Self>,
        camera: &Camera<C>,
        name: &str,
        data: &[u8],
    ) -> Result<FileEntry> {
        let path = FilePath::new(self.path.clone(), name);
        camera.run(|native| native.upload_file(&path, data))?;
        debug!(path = %path, bytes = data.len(), "uploaded");
        Ok(FileEntry::new(path, Arc::downgrade(self)))
    }

    fn listing<C: NativeCamera>(
        self: &Arc<Self>,
        camera: &Camera<C>,
    ) -> Result<(Vec<Arc<Self>>, Vec<FileEntry>)> {
        let listing = camera.run(|native| native.list_directory(&self.path))?;
        let directories = listing
            .directories
            .iter()
            .map(|name| self.child(name))
            .collect();
        let files = listing
            .files
            .into_iter()
            .map(|name| FileEntry::new(FilePath::new(self.path.clone(), name), Arc::downgrade(self)))
            .collect();
        Ok((directories, files))
    }

    fn split(&self) -> Option<(&str, &str)> {
        if self.is_root() {
            return None;
        }
        let (parent, _) = self.path.rsplit_once('/')?;
        Some((if parent.is_empty() { "/" } else { parent }, &self.name))
    }
}

/// A file on the device.
#[derive(Debug, Clone)]
pub struct FileEntry {
    path: FilePath,
    parent: Weak<DirectoryEntry>,
    info: OnceLock<FileInfo>,
}

impl FileEntry {
    fn new(path: FilePath, parent: Weak<DirectoryEntry>) -> Self {
        Self {
            path,
            parent,
            info: OnceLock::new(),
        }
    }

    /// A file known only by its path, such as a freshly captured image.
    pub(crate) fn detached(path: FilePath) -> Self {
        Self::new(path, Weak::new())
    }

    /// File name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.path.name
    }

    /// Absolute path of the enclosing folder.
    #[must_use]
    pub fn folder(&self) -> &str {
        &self.path.folder
    }

    /// Full location on the device.
    #[must_use]
    pub const fn path(&self) -> &FilePath {
        &self.path
    }

    /// Enclosing folder, if it is still alive.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<DirectoryEntry>> {
        self.parent.upgrade()
    }

    /// File metadata, fetched once and then cached.
    pub fn info<C: NativeCamera>(&self, camera: &Camera<C>) -> Result<FileInfo> {
        if let Some(info) = self.info.get() {
            return Ok(info.clone());
        }
        let info = camera.run(|native| native.file_info(&self.path))?;
        Ok(self.info.get_or_init(|| info).clone())
    }

    /// File size in bytes, or `None` if the device does not report it.
    pub fn size<C: NativeCamera>(&self, camera: &Camera<C>) -> Result<Option<u64>> {
        self.info(camera).map(|info| info.size)
    }

    /// Stream the content as chunks of at most `chunk_size` bytes.
    ///
    /// Each chunk is one device round-trip. Dropping the iterator abandons the
    /// transfer. Without a reported size, reading stops at the first chunk
    /// shorter than requested.
    pub fn iter_data<'a, C: NativeCamera>(
        &'a self,
        camera: &'a Camera<C>,
        chunk_size: usize,
    ) -> DataChunks<'a, C> {
        DataChunks {
            camera,
            file: self,
            size: None,
            sized: false,
            offset: 0,
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }

    /// Read the whole file into memory.
    pub fn read_all<C: NativeCamera>(&self, camera: &Camera<C>, chunk_size: usize) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        for chunk in self.iter_data(camera, chunk_size) {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }

    /// Copy the file into a local file at `target`, returning the bytes written.
    ///
    /// On failure the partially written target is left in place.
    pub fn save<C: NativeCamera, P: AsRef<Path>>(&self, camera: &Camera<C>, target: P) -> Result<u64> {
        self.save_with(camera, target, DEFAULT_CHUNK_SIZE)
    }

    /// [`save`](Self::save) with an explicit transfer chunk size.
    pub fn save_with<C: NativeCamera, P: AsRef<Path>>(
        &self,
        camera: &Camera<C>,
        target: P,
        chunk_size: usize,
    ) -> Result<u64> {
        let mut out = File::create(target.as_ref())?;
        let mut written = 0u64;
        for chunk in self.iter_data(camera, chunk_size) {
            let chunk = chunk?;
            out.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        out.flush()?;
        debug!(path = %self.path, target = %target.as_ref().display(), bytes = written, "saved");
        Ok(written)
    }

    /// Delete the file from the device.
    pub fn remove<C: NativeCamera>(&self, camera: &Camera<C>) -> Result<()> {
        camera.run(|native| native.delete_file(&self.path))
    }
}

impl PartialEq for FileEntry {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for FileEntry {}

/// Chunked content reader returned by [`FileEntry::iter_data`].
pub struct DataChunks<'a, C: NativeCamera> {
    camera: &'a Camera<C>,
    file: &'a FileEntry,
    size: Option<u64>,
    sized: bool,
    offset: u64,
    chunk_size: usize,
    done: bool,
}

impl<C: NativeCamera> DataChunks<'_, C> {
    /// Bytes delivered so far.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    fn interrupted(&mut self, source: CameraError) -> CameraError {
        self.done = true;
        CameraError::TransferInterrupted {
            path: self.file.path.clone(),
            offset: self.offset,
            source: Box::new(source),
        }
    }
}

impl<C: NativeCamera> Iterator for DataChunks<'_, C> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if !self.sized {
            match self.file.size(self.camera) {
                Ok(size) => {
                    self.size = size;
                    self.sized = true;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }

        let length = match self.size {
            Some(size) if self.offset >= size => {
                self.done = true;
                return None;
            }
            Some(size) => {
                usize::try_from(size - self.offset).map_or(self.chunk_size, |r| r.min(self.chunk_size))
            }
            None => self.chunk_size,
        };

        let path = &self.file.path;
        let offset = self.offset;
        match self.camera.run(|native| native.file_data(path, offset, length)) {
            Ok(chunk) if chunk.is_empty() && self.size.is_none() => {
                self.done = true;
                None
            }
            Ok(chunk) if chunk.is_empty() => Some(Err(self.interrupted(CameraError::Native(
                "device returned no data".to_owned(),
            )))),
            Ok(chunk) => {
                // A short read is the end of a file of unknown size.
                if self.size.is_none() && chunk.len() < length {
                    self.done = true;
                }
                self.offset += chunk.len() as u64;
                debug!(path = %self.file.path, offset = self.offset, size = ?self.size, "chunk read");
                Some(Ok(chunk))
            }
            Err(
                err @ (CameraError::DeviceTimeout
                | CameraError::DeviceClosed(_)
                | CameraError::InvalidToken),
            ) => {
                self.done = true;
                Some(Err(err))
            }
            Err(err) => Some(Err(self.interrupted(err))),
        }
    }
}

impl<C: NativeCamera> FusedIterator for DataChunks<'_, C> {}

/// Depth-first walk over every file on the device.
///
/// A folder's files come first, then its subfolders in device order.
pub struct FileWalk<'a, C: NativeCamera> {
    camera: &'a Camera<C>,
    pending: Vec<(Arc<DirectoryEntry>, usize)>,
    // Folders from the root down to the one whose files are queued. Every
    // queued folder's parent is on this chain.
    trail: Vec<Arc<DirectoryEntry>>,
    files: VecDeque<FileEntry>,
    failed: bool,
}

impl<C: NativeCamera> FileWalk<'_, C> {
    /// Folder whose files are currently being yielded.
    #[must_use]
    pub fn current_directory(&self) -> Option<&Arc<DirectoryEntry>> {
        self.trail.last()
    }
}

impl<C: NativeCamera> Iterator for FileWalk<'_, C> {
    type Item = Result<FileEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(file) = self.files.pop_front() {
                return Some(Ok(file));
            }
            if self.failed {
                return None;
            }

            let (directory, depth) = self.pending.pop()?;
            match directory.listing(self.camera) {
                Ok((directories, files)) => {
                    self.pending
                        .extend(directories.into_iter().rev().map(|dir| (dir, depth + 1)));
                    self.files.extend(files);
                    self.trail.truncate(depth);
                    self.trail.push(directory);
                }
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

impl<C: NativeCamera> FusedIterator for FileWalk<'_, C> {}

/// Depth-first walk over every folder on the device, root first.
pub struct DirectoryWalk<'a, C: NativeCamera> {
    camera: &'a Camera<C>,
    pending: Vec<(Arc<DirectoryEntry>, usize)>,
    trail: Vec<Arc<DirectoryEntry>>,
    failed: bool,
}

impl<C: NativeCamera> Iterator for DirectoryWalk<'_, C> {
    type Item = Result<Arc<DirectoryEntry>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let (directory, depth) = self.pending.pop()?;
        match directory.directories(self.camera) {
            Ok(children) => {
                self.pending
                    .extend(children.into_iter().rev().map(|dir| (dir, depth + 1)));
                self.trail.truncate(depth);
                self.trail.push(Arc::clone(&directory));
                Some(Ok(directory))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

impl<C: NativeCamera> FusedIterator for DirectoryWalk<'_, C> {}

impl<C: NativeCamera> Camera<C> {
    /// The device's root folder.
    #[must_use]
    pub fn filesystem(&self) -> Arc<DirectoryEntry> {
        DirectoryEntry::root()
    }

    /// Lazily enumerate every file on the device.
    ///
    /// Each call starts a fresh traversal that re-queries the device.
    pub fn list_files(&self) -> FileWalk<'_, C> {
        FileWalk {
            camera: self,
            pending: vec![(DirectoryEntry::root(), 0)],
            trail: Vec::new(),
            files: VecDeque::new(),
            failed: false,
        }
    }

    /// Lazily enumerate every folder on the device, starting with the root.
    pub fn list_directories(&self) -> DirectoryWalk<'_, C> {
        DirectoryWalk {
            camera: self,
            pending: vec![(DirectoryEntry::root(), 0)],
            trail: Vec::new(),
            failed: false,
        }
    }
}
