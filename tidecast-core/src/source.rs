//! Byte sources relayed to the controller.
//!
//! A source is either a static file with random access or a single-pass live
//! producer with no known end. [`MediaRequest`] captures the immutable
//! description of what is being relayed.

use std::path::{Path, PathBuf};

use tokio::io::AsyncRead;

use crate::CastError;

/// Metadata path sampled by the readiness detector for standard input.
#[cfg(unix)]
const STDIN_METADATA_PATH: &str = "/dev/stdin";

/// Kind of byte source behind a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    File,
    LiveStream,
}

/// What is being relayed and where it is served from.
///
/// Immutable once the origin server starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    kind: SourceKind,
    identifier: String,
    local_port: u16,
    scheme: String,
}

impl MediaRequest {
    /// Describes a file relay. The logical name is the file name.
    pub fn file(path: &Path, local_port: u16) -> Self {
        Self {
            kind: SourceKind::File,
            identifier: path.display().to_string(),
            local_port,
            scheme: "http".to_string(),
        }
    }

    /// Describes a live relay published under `name`.
    ///
    /// The name `-` publishes the stream at the bare origin with no path.
    pub fn live(name: impl Into<String>, local_port: u16) -> Self {
        Self {
            kind: SourceKind::LiveStream,
            identifier: name.into(),
            local_port,
            scheme: "http".to_string(),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Name placed in the origin address path.
    pub fn logical_name(&self) -> String {
        match self.kind {
            SourceKind::File => Path::new(&self.identifier)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.identifier.clone()),
            SourceKind::LiveStream => self.identifier.clone(),
        }
    }
}

/// A regular file served with whole-file semantics.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    /// Resolves `path` to an absolute regular file.
    ///
    /// # Errors
    ///
    /// - `CastError::StreamSource` - Path missing, not a regular file, or unreadable
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CastError> {
        let path = path.as_ref();
        let absolute = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| CastError::stream_source(format!("{}: {e}", path.display())))?;

        let metadata = tokio::fs::metadata(&absolute)
            .await
            .map_err(|e| CastError::stream_source(format!("{}: {e}", absolute.display())))?;
        if !metadata.is_file() {
            return Err(CastError::stream_source(format!(
                "{} is not a regular file",
                absolute.display()
            )));
        }

        // Opening proves readability before anything is announced.
        tokio::fs::File::open(&absolute)
            .await
            .map_err(|e| CastError::stream_source(format!("{}: {e}", absolute.display())))?;

        Ok(Self {
            path: absolute,
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A single-pass producer with no known end and no random access.
pub struct LiveSource {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    metadata_path: Option<PathBuf>,
}

impl LiveSource {
    /// Wraps any async reader as a live source.
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            metadata_path: None,
        }
    }

    /// Standard input of this process.
    pub fn stdin() -> Self {
        let source = Self::from_reader(tokio::io::stdin());
        #[cfg(unix)]
        let source = source.with_metadata_path(STDIN_METADATA_PATH);
        source
    }

    /// Path whose modification time tracks producer activity.
    pub fn with_metadata_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.metadata_path = Some(path.into());
        self
    }

    pub fn metadata_path(&self) -> Option<&Path> {
        self.metadata_path.as_deref()
    }

    pub fn into_parts(self) -> (Box<dyn AsyncRead + Send + Unpin>, Option<PathBuf>) {
        (self.reader, self.metadata_path)
    }
}

impl std::fmt::Debug for LiveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSource")
            .field("metadata_path", &self.metadata_path)
            .finish_non_exhaustive()
    }
}
