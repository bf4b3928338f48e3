//! Object identity: the `(container, path)` pair that names one unit of work.

use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

const URL_SCHEME: &str = "s3://";

/// Identifies one unit of work for the whole lifetime of the pipeline.
///
/// `path` is a logical prefix inside `container`; the restore stage treats it
/// as a folder and the archive stage packages everything beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pub container: String,
    pub path: String,
}

impl ObjectId {
    pub fn new(container: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            path: path.into(),
        }
    }

    /// Parses `s3://container/path` (the scheme is optional).
    ///
    /// Leading and trailing `/` around the path are dropped so that
    /// `s3://b/dir/` and `s3://b/dir` name the same object.
    pub fn parse(url: &str) -> Result<Self, PipelineError> {
        let invalid = || PipelineError::InvalidObjectUrl(url.to_string());
        let rest = url.strip_prefix(URL_SCHEME).unwrap_or(url);
        let (container, path) = rest.split_once('/').ok_or_else(invalid)?;
        let path = path.trim_matches('/');
        if container.is_empty() || path.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(container, path))
    }

    /// Renders the identity as an `s3://` URL, the form job commands carry.
    pub fn url(&self) -> String {
        format!("{URL_SCHEME}{}/{}", self.container, self.path)
    }

    /// The source prefix in the blob store, with a trailing `/`.
    pub fn source_prefix(&self) -> String {
        format!("{}/", self.path)
    }

    /// Location of the source data as an `s3://` URL ending in `/`.
    pub fn source_url(&self) -> String {
        format!("{}/", self.url())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.path)
    }
}

impl FromStr for ObjectId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
