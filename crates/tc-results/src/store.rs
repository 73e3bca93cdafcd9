//! Document sinks.

use crate::document::ResultDocument;
use crate::{ResultsError, ResultsResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Destination of the result document; every persist rewrites it whole.
pub trait DocumentSink: Send {
    fn persist(&mut self, doc: &ResultDocument) -> ResultsResult<()>;
}

/// Discards the document.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl DocumentSink for NullSink {
    fn persist(&mut self, _doc: &ResultDocument) -> ResultsResult<()> {
        Ok(())
    }
}

/// Writes the document as pretty JSON to a file.
#[derive(Clone, Debug)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentSink for FileSink {
    fn persist(&mut self, doc: &ResultDocument) -> ResultsResult<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
            && !dir.exists()
        {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, doc.to_json()?)?;
        debug!(path = %self.path.display(), solutions = doc.solution_count(), "result document written");
        Ok(())
    }
}

pub fn load_document(path: &Path) -> ResultsResult<ResultDocument> {
    if !path.exists() {
        return Err(ResultsError::DocumentNotFound {
            path: path.display().to_string(),
        });
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
