//! Source files and session state

use std::path::Path;
use std::sync::Arc;

use crate::preset::GenrePreset;

/// An uploaded audio file, held in memory
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub bytes: Arc<[u8]>,
    /// MIME type, used as a decoder hint
    pub content_type: Option<String>,
    /// Last modification time in ms since the epoch, when known
    pub modified_ms: Option<u64>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            content_type: None,
            modified_ms: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_modified_ms(mut self, modified_ms: u64) -> Self {
        self.modified_ms = Some(modified_ms);
        self
    }

    /// Read a file from disk, taking its name and mtime
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let modified_ms = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(Self {
            name,
            bytes: bytes.into(),
            content_type: None,
            modified_ms,
        })
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.name).extension().and_then(|e| e.to_str())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn id(&self) -> SourceId {
        SourceId {
            name: self.name.clone(),
            size: self.bytes.len() as u64,
            modified_ms: self.modified_ms,
        }
    }
}

/// File identity: name, size and modification time
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceId {
    pub name: String,
    pub size: u64,
    pub modified_ms: Option<u64>,
}

/// Lifecycle of the live graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphState {
    #[default]
    Uninitialized,
    /// Graph built; device may still be pending
    Ready,
    Playing,
    Paused,
    Disposed,
}

/// Snapshot of the live session
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSession {
    pub source_id: SourceId,
    pub graph_state: GraphState,
    /// Last preset applied through `apply_preset`
    pub current_preset: Option<GenrePreset>,
    pub position_s: f64,
    pub duration_s: f64,
    /// Whether the device context still has to be created
    pub device_pending: bool,
}

/// Token returned by `initialize`; stale once its session is torn down
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub(crate) id: u64,
    source_id: SourceId,
}

impl SessionHandle {
    pub(crate) fn new(id: u64, source_id: SourceId) -> Self {
        Self { id, source_id }
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_uses_name_size_mtime() {
        let a = SourceFile::new("a.wav", vec![0u8; 10]).with_modified_ms(5);
        let b = SourceFile::new("a.wav", vec![1u8; 10]).with_modified_ms(5);
        assert_eq!(a.id(), b.id());

        let c = SourceFile::new("a.wav", vec![0u8; 11]).with_modified_ms(5);
        assert_ne!(a.id(), c.id());
        let d = SourceFile::new("a.wav", vec![0u8; 10]).with_modified_ms(6);
        assert_ne!(a.id(), d.id());
    }

    #[test]
    fn test_extension() {
        assert_eq!(SourceFile::new("mix.final.flac", vec![]).extension(), Some("flac"));
        assert_eq!(SourceFile::new("noext", vec![]).extension(), None);
    }
}
