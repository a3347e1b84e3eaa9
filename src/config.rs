//! Lazily materialized mirror of a device's settings tree.
//!
//! Only the root is fetched up front. A section's children are fetched the
//! first time the section is traversed and cached from then on. Writes update
//! leaf values in place; the cached structure is never invalidated by them.

use tracing::{debug, info};

use crate::camera::Camera;
use crate::traits::{
    Bounds, CameraError, ConfigEntry, ConfigKind, ConfigValue, NativeCamera, Result, Setting,
};
use crate::validation::{parse_value, validate_value};

/// Cached settings tree of one camera.
#[derive(Debug, Default)]
pub struct ConfigTree {
    root: Option<ConfigNode>,
}

impl ConfigTree {
    /// Create an empty tree; nothing is fetched until [`ConfigTree::root`].
    #[must_use]
    pub const fn new() -> Self {
        Self { root: None }
    }

    /// The top-level section, fetched on first use.
    pub fn root<C: NativeCamera>(&mut self, camera: &Camera<C>) -> Result<&mut ConfigNode> {
        let root = match self.root.take() {
            Some(root) => root,
            None => {
                let entry = camera.run(|native| native.config_root())?;
                debug!(identity = %camera.identity(), root = %entry.name, "fetched config root");
                ConfigNode::new(Vec::new(), format!("/{}", entry.name), entry)
            }
        };
        Ok(self.root.insert(root))
    }

    /// Navigate to a setting by slash-separated path.
    ///
    /// The leading root name is optional: `/main/imgsettings/iso` and
    /// `imgsettings/iso` name the same setting.
    pub fn lookup<C: NativeCamera>(
        &mut self,
        camera: &Camera<C>,
        path: &str,
    ) -> Result<&mut ConfigNode> {
        let root = self.root(camera)?;
        let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
        if segments.peek().copied() == Some(root.name()) {
            segments.next();
        }
        segments.try_fold(root, |node, name| node.child(camera, name))
    }

    /// Whether the root has been fetched.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.root.is_some()
    }

    /// Forget everything fetched so far.
    pub fn clear(&mut self) {
        self.root = None;
    }
}

/// One section or leaf of the settings tree.
#[derive(Debug, Clone)]
pub struct ConfigNode {
    path: Vec<String>,
    location: String,
    entry: ConfigEntry,
    children: Option<Vec<ConfigNode>>,
    pending: Option<ConfigValue>,
}

impl ConfigNode {
    fn new(path: Vec<String>, location: String, entry: ConfigEntry) -> Self {
        Self {
            path,
            location,
            entry,
            children: None,
            pending: None,
        }
    }

    /// Short name, unique among siblings.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.entry.label
    }

    /// Slash-separated path from the root, root name included.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Kind of the setting.
    #[must_use]
    pub const fn kind(&self) -> ConfigKind {
        self.entry.setting.kind()
    }

    /// Whether the device refuses writes.
    #[must_use]
    pub const fn is_readonly(&self) -> bool {
        self.entry.readonly
    }

    /// Accepted choices of a choice setting.
    #[must_use]
    pub fn choices(&self) -> Option<&[String]> {
        match &self.entry.setting {
            Setting::Choice { choices, .. } => Some(choices),
            _ => None,
        }
    }

    /// Bounds of a range setting.
    #[must_use]
    pub const fn bounds(&self) -> Option<Bounds> {
        match &self.entry.setting {
            Setting::Range { bounds, .. } => Some(*bounds),
            _ => None,
        }
    }

    /// Whether the children of this node are cached. Leaves are always materialized.
    #[must_use]
    pub const fn is_materialized(&self) -> bool {
        !matches!(self.entry.setting, Setting::Section) || self.children.is_some()
    }

    /// Whether a staged value is waiting for [`ConfigNode::commit`].
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.pending.is_some()
    }

    /// Cached device value; `None` for a section.
    #[must_use]
    pub fn get(&self) -> Option<ConfigValue> {
        self.entry.setting.value()
    }

    /// Staged value, if any.
    #[must_use]
    pub const fn pending(&self) -> Option<&ConfigValue> {
        self.pending.as_ref()
    }

    /// Children already cached, without touching the device.
    #[must_use]
    pub fn cached_children(&self) -> Option<&[Self]> {
        self.children.as_deref()
    }

    /// Children of this node in device order, fetched on first call.
    pub fn children<C: NativeCamera>(&mut self, camera: &Camera<C>) -> Result<&mut [Self]> {
        if self.kind() != ConfigKind::Section {
            return Ok(&mut []);
        }
        let children = match self.children.take() {
            Some(children) => children,
            None => {
                let path = &self.path;
                let entries = camera.run(|native| native.config_children(path))?;
                debug!(setting = %self.location, count = entries.len(), "expanded config section");
                entries
                    .into_iter()
                    .map(|entry| {
                        let mut path = self.path.clone();
                        path.push(entry.name.clone());
                        let location = format!("{}/{}", self.location, entry.name);
                        Self::new(path, location, entry)
                    })
                    .collect()
            }
        };
        Ok(self.children.insert(children).as_mut_slice())
    }

    /// The child called `name`, expanding this section if needed.
    pub fn child<C: NativeCamera>(&mut self, camera: &Camera<C>, name: &str) -> Result<&mut Self> {
        let missing = format!("{}/{name}", self.location);
        self.children(camera)?
            .iter_mut()
            .find(|child| child.name() == name)
            .ok_or(CameraError::NoSuchSetting(missing))
    }

    /// Validate `value` and write it to the device now.
    ///
    /// On success the cached value is replaced and any staged value dropped.
    /// On failure the cache is left as it was.
    pub fn set<C: NativeCamera>(&mut self, camera: &Camera<C>, value: ConfigValue) -> Result<()> {
        validate_value(&self.location, &self.entry, &value)?;
        self.write(camera, value)
    }

    /// Validate `value` and keep it until [`ConfigNode::commit`].
    pub fn stage(&mut self, value: ConfigValue) -> Result<()> {
        validate_value(&self.location, &self.entry, &value)?;
        debug!(setting = %self.location, value = %value, "staged config value");
        self.pending = Some(value);
        Ok(())
    }

    /// Write the staged value. A failed write keeps it staged.
    pub fn commit<C: NativeCamera>(&mut self, camera: &Camera<C>) -> Result<()> {
        let value = self
            .pending
            .clone()
            .ok_or(CameraError::RedundantOperation("commit"))?;
        self.write(camera, value)
    }

    /// Drop the staged value.
    pub fn discard(&mut self) {
        self.pending = None;
    }

    /// Build a value of this node's kind from text.
    pub fn parse_value(&self, text: &str) -> Result<ConfigValue> {
        parse_value(&self.location, &self.entry, text)
    }

    /// Every leaf below this node, expanding the whole subtree.
    pub fn leaves<C: NativeCamera>(&mut self, camera: &Camera<C>) -> Result<Vec<&Self>> {
        self.select(camera, |_| true)
    }

    /// Status values below this node: read-only leaves plus everything in the
    /// top-level `status` section, skipping vendor property codes.
    pub fn status<C: NativeCamera>(&mut self, camera: &Camera<C>) -> Result<Vec<&Self>> {
        self.select(camera, |node| {
            (node.is_readonly() || node.section() == Some(STATUS_SECTION))
                && !is_vendor_property(node.name())
        })
    }

    /// Writable leaves below this node.
    pub fn writable<C: NativeCamera>(&mut self, camera: &Camera<C>) -> Result<Vec<&Self>> {
        self.select(camera, |node| !node.is_readonly())
    }

    // Top-level section this node sits in.
    fn section(&self) -> Option<&str> {
        self.path.first().map(String::as_str)
    }

    fn select<C, F>(&mut self, camera: &Camera<C>, keep: F) -> Result<Vec<&Self>>
    where
        C: NativeCamera,
        F: Fn(&Self) -> bool,
    {
        self.expand_all(camera)?;
        let mut selected = Vec::new();
        self.collect(&mut selected, &keep);
        Ok(selected)
    }

    fn expand_all<C: NativeCamera>(&mut self, camera: &Camera<C>) -> Result<()> {
        for child in self.children(camera)? {
            child.expand_all(camera)?;
        }
        Ok(())
    }

    fn collect<'a, F>(&'a self, selected: &mut Vec<&'a Self>, keep: &F)
    where
        F: Fn(&Self) -> bool,
    {
        match &self.children {
            Some(children) => {
                for child in children {
                    child.collect(selected, keep);
                }
            }
            None if self.kind() != ConfigKind::Section && keep(self) => selected.push(self),
            None => {}
        }
    }

    fn write<C: NativeCamera>(&mut self, camera: &Camera<C>, value: ConfigValue) -> Result<()> {
        let path = &self.path;
        camera
            .run(|native| native.set_config_value(path, &value))
            .map_err(|err| match err {
                CameraError::DeviceTimeout
                | CameraError::DeviceClosed(_)
                | CameraError::InvalidToken => err,
                other => CameraError::DeviceWriteFailed {
                    setting: self.location.clone(),
                    source: Box::new(other),
                },
            })?;

        info!(setting = %self.location, value = %value, "config value written");
        self.entry.setting.assign(value);
        self.pending = None;
        Ok(())
    }
}

const STATUS_SECTION: &str = "status";

/// Vendor PTP property codes such as `d402` are reported as 4-digit hex names.
fn is_vendor_property(name: &str) -> bool {
    name.len() == 4 && name.chars().all(|c| c.is_ascii_hexdigit())
}
