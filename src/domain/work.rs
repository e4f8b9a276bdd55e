use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "m4v", "mkv"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];
/// Image formats the ad platform rejects but we can re-encode locally.
pub const CONVERTIBLE_IMAGE_EXTENSIONS: &[&str] = &["webp", "bmp", "tif", "tiff"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    /// Classify a file by extension; `None` for anything we do not process.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str())
            || CONVERTIBLE_IMAGE_EXTENSIONS.contains(&ext.as_str())
        {
            Some(Self::Image)
        } else {
            None
        }
    }
}

/// Position of a unit inside its batch: `(group index, unit index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId {
    pub group: usize,
    pub unit: usize,
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.unit)
    }
}

/// Files produced while a unit is processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedArtifacts {
    pub normalized: Option<PathBuf>,
    pub thumbnail: Option<PathBuf>,
    pub trimmed: Option<PathBuf>,
}

/// One media file and everything derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub id: UnitId,
    pub source_path: PathBuf,
    pub media_kind: MediaKind,
    pub derived: DerivedArtifacts,
}

impl WorkUnit {
    pub fn new(id: UnitId, source_path: PathBuf, media_kind: MediaKind) -> Self {
        Self {
            id,
            source_path,
            media_kind,
            derived: DerivedArtifacts::default(),
        }
    }

    /// File stem, used as the composite object's display name.
    pub fn display_name(&self) -> String {
        self.source_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Units sharing one remote container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkGroup {
    pub group_key: String,
    pub units: Vec<WorkUnit>,
}

impl WorkGroup {
    pub fn new(group_key: impl Into<String>, units: Vec<WorkUnit>) -> Self {
        Self {
            group_key: group_key.into(),
            units,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Identifier of the composite object created for a successful unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeRef(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(CompositeRef),
    Failure(String),
    Canceled,
}

impl Outcome {
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Outcome of one unit, keyed by the unit's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub unit_id: UnitId,
    pub source_path: PathBuf,
    pub outcome: Outcome,
    /// Files produced before the unit ended, whatever the outcome.
    pub derived: DerivedArtifacts,
}
