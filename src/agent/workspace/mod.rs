//! Run-scoped virtual filesystem shared by every agent of one run.
//!
//! Layout: `<base>/sessions/<run_id>/input` holds caller-provided files and
//! `<base>/sessions/<run_id>/output` holds agent-written artifacts. Every
//! caller-supplied filename is reduced to its final component before it is
//! joined, so no name can escape the session directory.

use crate::utils::{atomic_write, truncate_chars};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const TRUNCATION_MARKER: &str = "\n...[TRUNCATED]...";
const DEFAULT_READ_LIMIT_CHARS: usize = 50_000;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("invalid filename: '{0}'")]
    InvalidName(String),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("File {0} is not valid UTF-8 text")]
    NotUtf8(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Contents of both session directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FILES:\nInputs: {:?}\nOutputs: {:?}",
            self.inputs, self.outputs
        )
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    run_id: String,
    session_root: PathBuf,
    read_limit_chars: usize,
}

impl WorkspaceManager {
    pub fn new(base: impl AsRef<Path>, run_id: &str) -> Self {
        let run_id = Self::secure_name(run_id).unwrap_or_else(|_| "default".to_string());
        let session_root = base.as_ref().join("sessions").join(&run_id);
        Self {
            run_id,
            session_root,
            read_limit_chars: DEFAULT_READ_LIMIT_CHARS,
        }
    }

    #[must_use]
    pub fn with_read_limit(mut self, chars: usize) -> Self {
        self.read_limit_chars = chars;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn session_root(&self) -> &Path {
        &self.session_root
    }

    /// Keep only the final path component of `filename`.
    ///
    /// `../../etc/passwd` becomes `passwd`. Names with no usable component
    /// (empty, `.`, `..`, `/`) are rejected.
    pub fn secure_name(filename: &str) -> Result<String, WorkspaceError> {
        Path::new(filename.trim())
            .file_name()
            .and_then(|n| n.to_str())
            .map(ToString::to_string)
            .ok_or_else(|| WorkspaceError::InvalidName(filename.to_string()))
    }

    fn dir(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        let dir = self.session_root.join(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn input_dir(&self) -> Result<PathBuf, WorkspaceError> {
        self.dir("input")
    }

    pub fn output_dir(&self) -> Result<PathBuf, WorkspaceError> {
        self.dir("output")
    }

    /// Locate `filename`, preferring the agent's own output over inputs.
    pub fn locate(&self, filename: &str) -> Result<PathBuf, WorkspaceError> {
        let name = Self::secure_name(filename)?;
        for dir in [self.output_dir()?, self.input_dir()?] {
            let candidate = dir.join(&name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(WorkspaceError::NotFound(name))
    }

    /// Read a text file, truncated to the read limit.
    pub fn read(&self, filename: &str) -> Result<String, WorkspaceError> {
        let path = self.locate(filename)?;
        let bytes = std::fs::read(&path)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| WorkspaceError::NotUtf8(Self::secure_name(filename).unwrap_or_default()))?;
        Ok(truncate_chars(&text, self.read_limit_chars, TRUNCATION_MARKER))
    }

    /// Write `content` into the output directory and return the stored name.
    ///
    /// The write is atomic and synced to disk before this returns. An existing
    /// file of the same name is replaced.
    pub fn write(&self, filename: &str, content: &[u8]) -> Result<String, WorkspaceError> {
        let name = Self::secure_name(filename)?;
        let path = self.output_dir()?.join(&name);
        atomic_write(&path, content).map_err(|e| std::io::Error::other(format!("{e:#}")))?;
        debug!(
            "wrote {} bytes to {}/output/{}",
            content.len(),
            self.run_id,
            name
        );
        Ok(name)
    }

    /// Regular files in the input directory, sorted by name.
    pub fn input_files(&self) -> Result<Vec<PathBuf>, WorkspaceError> {
        list_dir(&self.input_dir()?)
    }

    pub fn list(&self) -> Result<Listing, WorkspaceError> {
        let names = |paths: Vec<PathBuf>| {
            paths
                .iter()
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
                .collect()
        };
        Ok(Listing {
            inputs: names(list_dir(&self.input_dir()?)?),
            outputs: names(list_dir(&self.output_dir()?)?),
        })
    }
}

fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, WorkspaceError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
