//! Scene export.

use super::template::render_template;
use crate::core::Scan;
use crate::errors::{MissingRoleError, PreprocessError, ToolError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Component, Path};
use tracing::info;

/// The descriptor skeleton understood by the viewer.
pub const SCENE_TEMPLATE: &str = include_str!("../../assets/scene_template.xml");

/// A semantic image role in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneRole {
    /// Post-implant CT head image in oriented space.
    PostImplantCt,
    /// Pre-implant MR head image in oriented space.
    PreImplantMrHead,
    /// Brain-masked pre-implant MR in oriented space.
    PreImplantMrBrain,
}

impl SceneRole {
    /// Every role the scene requires.
    pub const ALL: [Self; 3] = [Self::PostImplantCt, Self::PreImplantMrHead, Self::PreImplantMrBrain];

    /// Returns the role's name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PostImplantCt => "post_implant_ct",
            Self::PreImplantMrHead => "pre_implant_mr_head",
            Self::PreImplantMrBrain => "pre_implant_mr_brain",
        }
    }

    const fn slot_prefix(self) -> &'static str {
        match self {
            Self::PostImplantCt => "head_image_ct",
            Self::PreImplantMrHead => "head_image_mr",
            Self::PreImplantMrBrain => "brain_image",
        }
    }

    /// Template slot receiving the scan's relative path.
    #[must_use]
    pub fn path_slot(self) -> String {
        format!("{}_path", self.slot_prefix())
    }

    /// Template slot receiving the scan's display name.
    #[must_use]
    pub fn name_slot(self) -> String {
        format!("{}_name", self.slot_prefix())
    }
}

impl fmt::Display for SceneRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which scan fills each scene role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneDescription {
    scans: BTreeMap<SceneRole, Scan>,
}

impl SceneDescription {
    /// Creates an empty description.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a scan to a role.
    #[must_use]
    pub fn with_role(mut self, role: SceneRole, scan: Scan) -> Self {
        self.scans.insert(role, scan);
        self
    }

    /// Returns the scan for a role.
    #[must_use]
    pub fn get(&self, role: SceneRole) -> Option<&Scan> {
        self.scans.get(&role)
    }

    /// Iterates over assigned roles.
    pub fn iter(&self) -> impl Iterator<Item = (SceneRole, &Scan)> {
        self.scans.iter().map(|(role, scan)| (*role, scan))
    }
}

/// Renders scene descriptions into the viewer's descriptor format.
#[derive(Debug, Clone)]
pub struct SceneExporter {
    template: String,
}

impl Default for SceneExporter {
    fn default() -> Self {
        Self::new(SCENE_TEMPLATE)
    }
}

impl SceneExporter {
    /// Creates an exporter for a template.
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Renders the descriptor with paths relative to `target_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`MissingRoleError`] if a role has no scan, a [`ToolError`]
    /// if a scan path cannot be expressed relative to `target_dir`, and a
    /// template error if the template is malformed or its slots drifted.
    pub fn render(&self, scene: &SceneDescription, target_dir: &Path) -> Result<String, PreprocessError> {
        let mut values = BTreeMap::new();
        for role in SceneRole::ALL {
            let scan = scene
                .get(role)
                .ok_or_else(|| MissingRoleError::new(role.as_str()))?;
            values.insert(role.path_slot(), relative_path(&scan.path, target_dir)?);
            values.insert(role.name_slot(), scan.name.clone());
        }

        render_template(&self.template, &values)
    }

    /// Renders the descriptor and writes it to `out_path`.
    ///
    /// The file is replaced atomically. Nothing is written on error.
    ///
    /// # Errors
    ///
    /// See [`SceneExporter::render`]; IO failures are also returned.
    pub fn export(
        &self,
        scene: &SceneDescription,
        target_dir: &Path,
        out_path: &Path,
    ) -> Result<(), PreprocessError> {
        let xml = self.render(scene, target_dir)?;

        let parent = match out_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(parent)?;
        file.write_all(xml.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(out_path).map_err(|e| e.error)?;

        info!(path = %out_path.display(), "Scene exported");
        Ok(())
    }
}

/// Expresses `path` relative to `base`, component by component.
///
/// Two relative paths are related as written. When only one side is
/// absolute, both are first resolved against the working directory.
///
/// # Errors
///
/// Returns [`ToolError::NonUtf8Path`] if either path is not valid UTF-8, and
/// an IO error if the working directory cannot be read.
pub fn relative_path(path: &Path, base: &Path) -> Result<String, ToolError> {
    let (path, base) = if path.is_absolute() == base.is_absolute() {
        (path.to_path_buf(), base.to_path_buf())
    } else {
        let absolute = |p: &Path| std::path::absolute(p).map_err(|e| ToolError::io("scene", &e));
        (absolute(path)?, absolute(base)?)
    };

    let normal = |p: &Path| -> Result<Vec<String>, ToolError> {
        p.components()
            .filter(|c| !matches!(c, Component::CurDir))
            .map(|c| {
                c.as_os_str()
                    .to_str()
                    .map(str::to_string)
                    .ok_or_else(|| ToolError::non_utf8(p))
            })
            .collect()
    };
    let path = normal(&path)?;
    let base = normal(&base)?;

    let common = path.iter().zip(&base).take_while(|(a, b)| a == b).count();
    let parts: Vec<&str> = std::iter::repeat("..")
        .take(base.len() - common)
        .chain(path[common..].iter().map(String::as_str))
        .collect();

    if parts.is_empty() {
        Ok(".".to_string())
    } else {
        Ok(parts.join("/"))
    }
}
