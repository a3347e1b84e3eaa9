//! libgphoto2 backend using the gphoto2 crate.

use gphoto2::filesys::{AccessType, StorageType as NativeStorageType};
use gphoto2::widget::Widget;
use gphoto2::{Camera, Context};
use tracing::debug;

use crate::traits::{
    Bounds, CameraDescriptor, CameraDriver, CameraError, CameraIdentity, ConfigEntry, ConfigValue,
    FileInfo, FilePath, Listing, NativeCamera, Permissions, Result, Setting, StorageAccess,
    StorageInfo, StorageType,
};

/// Driver enumerating and opening cameras through libgphoto2.
pub struct GPhotoDriver {
    context: Context,
}

impl GPhotoDriver {
    /// Create a libgphoto2 context.
    pub fn new() -> Result<Self> {
        let context = Context::new().map_err(native_error)?;
        Ok(Self { context })
    }

    fn descriptors(&self) -> Result<Vec<(CameraIdentity, gphoto2::list::CameraDescriptor)>> {
        let cameras = self.context.list_cameras().wait().map_err(native_error)?;
        Ok(cameras
            .filter_map(|camera| match camera.port.parse::<CameraIdentity>() {
                Ok(identity) => Some((identity, camera)),
                Err(_) => {
                    debug!(port = %camera.port, model = %camera.model, "skipping non-USB camera");
                    None
                }
            })
            .collect())
    }
}

impl CameraDriver for GPhotoDriver {
    type Camera = GPhotoCamera;

    fn list_supported_devices(&self) -> Result<Vec<CameraDescriptor>> {
        Ok(self
            .descriptors()?
            .into_iter()
            .map(|(identity, camera)| CameraDescriptor {
                identity,
                model: camera.model,
            })
            .collect())
    }

    fn open(&self, identity: CameraIdentity) -> Result<GPhotoCamera> {
        let (_, descriptor) = self
            .descriptors()?
            .into_iter()
            .find(|(candidate, _)| *candidate == identity)
            .ok_or_else(|| CameraError::DeviceNotFound(identity.to_string()))?;

        let camera = self
            .context
            .get_camera(&descriptor)
            .wait()
            .map_err(native_error)?;

        Ok(GPhotoCamera {
            camera: Some(camera),
            context: self.context.clone(),
            download: None,
        })
    }
}

/// One open libgphoto2 camera.
///
/// libgphoto2 has no ranged reads, so the last downloaded file is kept in
/// memory and chunks are served from it.
pub struct GPhotoCamera {
    camera: Option<Camera>,
    context: Context,
    download: Option<(FilePath, Vec<u8>)>,
}

impl GPhotoCamera {
    fn camera(&self) -> Result<&Camera> {
        self.camera
            .as_ref()
            .ok_or_else(|| CameraError::Native("camera handle already closed".to_owned()))
    }

    fn download(&mut self, path: &FilePath) -> Result<&[u8]> {
        let cached = self
            .download
            .as_ref()
            .is_some_and(|(cached, _)| cached == path);
        if !cached {
            let file = self
                .camera()?
                .fs()
                .download(&path.folder, &path.name)
                .wait()
                .map_err(native_error)?;
            let data = file.get_data(&self.context).wait().map_err(native_error)?;
            debug!(path = %path, bytes = data.len(), "downloaded file");
            self.download = Some((path.clone(), data.into_vec()));
        }
        Ok(self
            .download
            .as_ref()
            .map_or(&[][..], |(_, data)| data.as_slice()))
    }

    fn forget(&mut self, path: &FilePath) {
        if self.download.as_ref().is_some_and(|(cached, _)| cached == path) {
            self.download = None;
        }
    }

    fn widget_at(&self, path: &[String]) -> Result<Widget> {
        let root = self.camera()?.config().wait().map_err(native_error)?;
        let mut widget = Widget::Group(root);
        for name in path {
            let Widget::Group(group) = &widget else {
                return Err(CameraError::Native(format!(
                    "/{} is not a section",
                    path.join("/")
                )));
            };
            widget = group.get_child_by_name(name).map_err(native_error)?;
        }
        Ok(widget)
    }
}

impl NativeCamera for GPhotoCamera {
    fn capture(&mut self) -> Result<FilePath> {
        let path = self
            .camera()?
            .capture_image()
            .wait()
            .map_err(native_error)?;
        Ok(FilePath::new(path.folder(), path.name()))
    }

    fn preview(&mut self) -> Result<Vec<u8>> {
        let file = self
            .camera()?
            .capture_preview()
            .wait()
            .map_err(native_error)?;
        let data = file.get_data(&self.context).wait().map_err(native_error)?;
        Ok(data.into_vec())
    }

    fn list_directory(&mut self, folder: &str) -> Result<Listing> {
        let fs = self.camera()?.fs();
        let directories = fs.list_folders(folder).wait().map_err(native_error)?.collect();
        let files = fs.list_files(folder).wait().map_err(native_error)?.collect();
        Ok(Listing { directories, files })
    }

    fn file_info(&mut self, path: &FilePath) -> Result<FileInfo> {
        let info = self
            .camera()?
            .fs()
            .file_info(&path.folder, &path.name)
            .wait()
            .map_err(native_error)?;
        let file = info.file();

        Ok(FileInfo {
            size: file.size(),
            mimetype: file.mime_type().map(|mime| mime.to_string()),
            dimensions: file.width().zip(file.height()),
            mtime: file.mtime(),
            permissions: file
                .permissions()
                .map(|permissions| Permissions {
                    read: permissions.read(),
                    delete: permissions.delete(),
                })
                .unwrap_or_default(),
        })
    }

    fn file_data(&mut self, path: &FilePath, offset: u64, length: usize) -> Result<Vec<u8>> {
        let data = self.download(path)?;
        let start = usize::try_from(offset).map_or(data.len(), |start| start.min(data.len()));
        let end = start.saturating_add(length).min(data.len());
        let chunk = data.get(start..end).unwrap_or_default().to_vec();
        if end == data.len() {
            self.forget(path);
        }
        Ok(chunk)
    }

    fn delete_file(&mut self, path: &FilePath) -> Result<()> {
        self.forget(path);
        self.camera()?
            .fs()
            .delete_file(&path.folder, &path.name)
            .wait()
            .map_err(native_error)
    }

    fn upload_file(&mut self, path: &FilePath, data: &[u8]) -> Result<()> {
        self.camera()?
            .fs()
            .upload_file(&path.folder, &path.name, Box::from(data))
            .wait()
            .map_err(native_error)
    }

    fn make_directory(&mut self, parent: &str, name: &str) -> Result<()> {
        self.camera()?
            .fs()
            .create_directory(parent, name)
            .wait()
            .map_err(native_error)
    }

    fn remove_directory(&mut self, parent: &str, name: &str) -> Result<()> {
        self.camera()?
            .fs()
            .remove_directory(parent, name)
            .wait()
            .map_err(native_error)
    }

    fn config_root(&mut self) -> Result<ConfigEntry> {
        let root = self.widget_at(&[])?;
        config_entry(&root).ok_or_else(|| CameraError::Native("unsupported root widget".to_owned()))
    }

    fn config_children(&mut self, path: &[String]) -> Result<Vec<ConfigEntry>> {
        match self.widget_at(path)? {
            Widget::Group(group) => Ok(group
                .children_iter()
                .filter_map(|child| config_entry(&child))
                .collect()),
            _ => Err(CameraError::Native(format!(
                "/{} is not a section",
                path.join("/")
            ))),
        }
    }

    fn set_config_value(&mut self, path: &[String], value: &ConfigValue) -> Result<()> {
        let widget = self.widget_at(path)?;
        match (&widget, value) {
            (Widget::Text(text), ConfigValue::Text(new)) => {
                text.set_value(new).map_err(native_error)?;
            }
            (Widget::Radio(radio), ConfigValue::Choice(new)) => {
                radio.set_choice(new).map_err(native_error)?;
            }
            (Widget::Range(range), ConfigValue::Range(new)) => range.set_value(*new),
            (Widget::Toggle(toggle), ConfigValue::Toggle(new)) => toggle.set_toggled(*new),
            (Widget::Date(date), ConfigValue::Date(new)) => {
                let timestamp = i32::try_from(*new).map_err(|_| {
                    CameraError::Native(format!("timestamp {new} does not fit the device clock"))
                })?;
                date.set_timestamp(timestamp);
            }
            _ => {
                return Err(CameraError::Native(format!(
                    "widget /{} does not take {} values",
                    path.join("/"),
                    value.kind()
                )))
            }
        }
        self.camera()?
            .set_config(&widget)
            .wait()
            .map_err(native_error)
    }

    fn model(&mut self) -> Result<String> {
        Ok(self.camera()?.abilities().model().to_string())
    }

    fn storage_info(&mut self) -> Result<Vec<StorageInfo>> {
        let storages = self
            .camera()?
            .fs()
            .storage_info()
            .wait()
            .map_err(native_error)?;

        Ok(storages
            .into_iter()
            .map(|storage| StorageInfo {
                base_directory: storage.base_directory().map(|dir| dir.to_string()),
                label: storage.label().map(|label| label.to_string()),
                description: storage.description().map(|text| text.to_string()),
                storage_type: storage.storage_type().map(|kind| match kind {
                    NativeStorageType::FixedRom => StorageType::FixedRom,
                    NativeStorageType::RemovableRom => StorageType::RemovableRom,
                    NativeStorageType::FixedRam => StorageType::FixedRam,
                    NativeStorageType::RemovableRam => StorageType::RemovableRam,
                    _ => StorageType::Unknown,
                }),
                access: storage.access_type().map(|access| match access {
                    AccessType::Rw => StorageAccess::ReadWrite,
                    AccessType::Ro => StorageAccess::ReadOnly,
                    AccessType::RoDelete => StorageAccess::ReadDelete,
                }),
                capacity_kb: storage.capacity_kb().and_then(|kb| u64::try_from(kb).ok()),
                free_kb: storage.free_kb().and_then(|kb| u64::try_from(kb).ok()),
                free_images: storage.free_images().and_then(|n| u64::try_from(n).ok()),
            })
            .collect())
    }

    fn close(&mut self) -> Result<()> {
        self.download = None;
        // libgphoto2 releases the port when the camera is dropped.
        match self.camera.take() {
            Some(camera) => {
                drop(camera);
                Ok(())
            }
            None => Err(CameraError::RedundantOperation("close")),
        }
    }
}

/// Describe a widget, or `None` for kinds without a settable value (buttons).
fn config_entry(widget: &Widget) -> Option<ConfigEntry> {
    let setting = match widget {
        Widget::Group(_) => Setting::Section,
        Widget::Text(text) => Setting::Text(text.value()),
        Widget::Radio(radio) => Setting::Choice {
            current: radio.choice(),
            choices: radio.choices_iter().collect(),
        },
        Widget::Range(range) => {
            let (bounds, step) = range.range_and_step();
            Setting::Range {
                current: range.value(),
                bounds: Bounds::new(*bounds.start(), *bounds.end(), step),
            }
        }
        Widget::Toggle(toggle) => Setting::Toggle(toggle.toggled().unwrap_or(false)),
        Widget::Date(date) => Setting::Date(i64::from(date.timestamp())),
        Widget::Button(_) => return None,
    };

    Some(ConfigEntry {
        name: widget.name(),
        label: widget.label(),
        readonly: widget.readonly(),
        setting,
    })
}

/// Map a libgphoto2 error onto the crate's error kinds.
fn native_error(err: gphoto2::Error) -> CameraError {
    use gphoto2::error::ErrorKind;

    match err.kind() {
        ErrorKind::Timeout => CameraError::DeviceTimeout,
        ErrorKind::CameraBusy => CameraError::DeviceBusy(err.to_string()),
        ErrorKind::ModelNotFound => CameraError::DeviceNotFound(err.to_string()),
        _ => CameraError::Native(err.to_string()),
    }
}
