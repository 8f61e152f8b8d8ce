//! Transfer items: a single file, folder, or text blob within a session.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Sentinel size for folders, whose byte count is computed while streaming.
pub const FOLDER_SIZE_SENTINEL: i64 = -1;

/// What an item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// A single regular file.
    File,
    /// A directory tree, streamed one descendant per frame.
    Folder,
    /// An inline UTF-8 text blob.
    Text,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Folder => write!(f, "folder"),
            Self::Text => write!(f, "text"),
        }
    }
}

/// Item lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Not yet touched by the data plane.
    Pending,
    /// Bytes are flowing.
    InProgress,
    /// All bytes delivered.
    Completed,
    /// The item died; see `error`. Other items continue.
    Failed,
    /// Deliberately left out (e.g. unreadable at walk time).
    Skipped,
}

/// A single transferable thing inside a session.
#[derive(Debug, Clone)]
pub struct TransferItem {
    /// Stable id, minted by the side that created the session.
    pub id: Uuid,
    /// Logical name (file name, folder name, or text label).
    pub name: String,
    /// Source path on the sending host; `None` for text and for items
    /// reconstructed from a request preview.
    pub source: Option<PathBuf>,
    /// Size in bytes; [`FOLDER_SIZE_SENTINEL`] for folders.
    pub size: i64,
    /// Item kind.
    pub kind: ItemKind,
    /// Inline content for text items.
    pub text: Option<String>,
    /// Lifecycle status.
    pub status: ItemStatus,
    /// Bytes moved so far for this item.
    pub transferred: u64,
    /// Failure detail when `status == Failed`.
    pub error: Option<String>,
}

impl TransferItem {
    /// A file item with a known size.
    #[must_use]
    pub fn file(name: impl Into<String>, source: PathBuf, size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source: Some(source),
            size: size as i64,
            kind: ItemKind::File,
            text: None,
            status: ItemStatus::Pending,
            transferred: 0,
            error: None,
        }
    }

    /// A folder item; its size is discovered during streaming.
    #[must_use]
    pub fn folder(name: impl Into<String>, source: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source: Some(source),
            size: FOLDER_SIZE_SENTINEL,
            kind: ItemKind::Folder,
            text: None,
            status: ItemStatus::Pending,
            transferred: 0,
            error: None,
        }
    }

    /// An inline text item.
    #[must_use]
    pub fn text(name: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source: None,
            size: content.len() as i64,
            kind: ItemKind::Text,
            text: Some(content),
            status: ItemStatus::Pending,
            transferred: 0,
            error: None,
        }
    }

    /// A placeholder reconstructed from a request preview on the receiving
    /// side.
    #[must_use]
    pub fn from_preview(name: impl Into<String>, size: i64, kind: ItemKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source: None,
            size,
            kind,
            text: None,
            status: ItemStatus::Pending,
            transferred: 0,
            error: None,
        }
    }

    /// Record progress, clamped so `transferred` never exceeds a known size.
    pub fn add_transferred(&mut self, bytes: u64) {
        self.transferred += bytes;
        if self.size >= 0 {
            self.transferred = self.transferred.min(self.size as u64);
        }
    }

    /// Mark the item failed with a reason.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ItemStatus::Failed;
        self.error = Some(error.into());
    }

    /// Whether the item reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Skipped
        )
    }
}
