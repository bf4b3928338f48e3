use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::object::ObjectId;
use crate::store::BlobPath;

/// Markers in the archive inbox were written when a restore was requested;
/// bulk restores need this long to settle before the data can be packaged.
const ARCHIVE_QUARANTINE: Duration = Duration::from_secs(24 * 60 * 60);

/// The stages of the mothball pipeline.
///
/// Each object flows through: RESTORE → ARCHIVE → PURGE → DONE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Restore,
    Archive,
    Purge,
    Done,
}

impl Stage {
    /// Stages that have work attached to them, in pipeline order.
    pub const RUNNABLE: [Stage; 3] = [Stage::Restore, Stage::Archive, Stage::Purge];

    pub const ALL: [Stage; 4] = [Stage::Restore, Stage::Archive, Stage::Purge, Stage::Done];

    /// Marker namespace segment and CLI command word.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Restore => "restore",
            Stage::Archive => "archive",
            Stage::Purge => "purge",
            Stage::Done => "done",
        }
    }

    /// The stage an object moves to once this one succeeds. `Done` is terminal.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Restore => Some(Stage::Archive),
            Stage::Archive => Some(Stage::Purge),
            Stage::Purge => Some(Stage::Done),
            Stage::Done => None,
        }
    }

    /// Minimum marker age before the dispatcher will queue work for this stage.
    pub fn quarantine(self) -> Option<Duration> {
        match self {
            Stage::Archive => Some(ARCHIVE_QUARANTINE),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| format!("unknown stage `{s}`"))
    }
}

/// Derives every blob path the pipeline touches from an object identity.
///
/// All paths live in one namespace container:
/// - `steps/<stage>/<container>/<path>` for markers
/// - `indexes/<container>/<path>.manifest` for archive manifests
/// - `files/<container>/<path>.pkg` for packaged archives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    container: String,
}

impl Layout {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn stage_prefix(&self, stage: Stage) -> String {
        format!("steps/{stage}/")
    }

    pub fn marker(&self, stage: Stage, id: &ObjectId) -> BlobPath {
        BlobPath::new(
            &self.container,
            format!("{}{}/{}", self.stage_prefix(stage), id.container, id.path),
        )
    }

    pub fn manifest(&self, id: &ObjectId) -> BlobPath {
        BlobPath::new(
            &self.container,
            format!("indexes/{}/{}.manifest", id.container, id.path),
        )
    }

    pub fn package(&self, id: &ObjectId) -> BlobPath {
        BlobPath::new(
            &self.container,
            format!("files/{}/{}.pkg", id.container, id.path),
        )
    }

    /// Maps a listed marker key back to the identity it tracks.
    ///
    /// Returns `None` for keys outside the stage namespace or without both a
    /// container and a path segment.
    pub fn identity_from_marker_key(&self, stage: Stage, key: &str) -> Option<ObjectId> {
        let rest = key.strip_prefix(&self.stage_prefix(stage))?;
        let (container, path) = rest.split_once('/')?;
        if container.is_empty() || path.is_empty() {
            return None;
        }
        Some(ObjectId::new(container, path))
    }
}
