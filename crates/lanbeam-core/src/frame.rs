//! Framing for the transfer data stream.
//!
//! Every frame starts with an 8-byte big-endian length of a JSON manifest,
//! followed by the manifest bytes, followed by a raw payload whose length
//! the manifest declares (zero for the header, END, and empty items). The
//! payload itself is streamed by the caller; this module only moves
//! manifests.
//!
//! Unknown optional manifest fields are ignored for forward compatibility;
//! anything else wrong with a manifest is a [`FrameDecodeError`] and fatal
//! to the session it belongs to.

use crate::item::ItemKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Upper bound on manifest size; anything larger is junk or an attack.
pub const MAX_MANIFEST_SIZE: u64 = 256 * 1024;

/// First frame of every stream: identifies and sizes the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    /// The negotiated transfer id.
    pub transfer_id: Uuid,
    /// Aggregate payload bytes that will follow.
    pub total_bytes: u64,
    /// Total number of files (folder descendants counted individually).
    pub total_files: u64,
    /// Capability flags; receivers ignore flags they do not know.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Manifest of one item frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemManifest {
    /// Id of the session item this frame belongs to. Folder descendants
    /// share their folder's item id.
    pub item_id: Uuid,
    /// Item kind.
    pub kind: ItemKind,
    /// Posix-separated destination path relative to the save location.
    /// For folder descendants it is rooted at the top-level selection name.
    pub relative_path: String,
    /// Exact payload length following this manifest.
    pub size: u64,
    /// Whether this is the final frame of its session item.
    #[serde(default)]
    pub last: bool,
}

/// A frame manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum FrameManifest {
    /// Session header; payload length zero.
    Header(SessionHeader),
    /// Item frame; payload length `size`.
    Item(ItemManifest),
    /// Orderly end of stream; payload length zero.
    End {},
}

impl FrameManifest {
    /// Payload bytes that follow this manifest on the wire.
    #[must_use]
    pub fn payload_len(&self) -> u64 {
        match self {
            Self::Item(item) => item.size,
            Self::Header(_) | Self::End {} => 0,
        }
    }
}

/// Decode failures; all fatal to the session.
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    /// Declared manifest length exceeds [`MAX_MANIFEST_SIZE`].
    #[error("manifest length {0} exceeds limit")]
    ManifestTooLarge(u64),

    /// Manifest bytes were not a valid manifest.
    #[error("manifest parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The stream ended inside a length prefix or manifest.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Write one manifest (length prefix plus JSON). The caller streams the
/// payload afterwards.
///
/// # Errors
///
/// Surfaces the underlying write error.
pub async fn write_manifest<W>(writer: &mut W, manifest: &FrameManifest) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(manifest).expect("manifest serialization is total");
    writer.write_u64(bytes.len() as u64).await?;
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Read one manifest (length prefix plus JSON). The caller must then
/// consume exactly [`FrameManifest::payload_len`] payload bytes.
///
/// # Errors
///
/// Returns [`FrameDecodeError`] on length abuse, JSON failure, or stream
/// I/O failure (including a short read inside the manifest).
pub async fn read_manifest<R>(reader: &mut R) -> Result<FrameManifest, FrameDecodeError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u64().await?;
    if len > MAX_MANIFEST_SIZE {
        return Err(FrameDecodeError::ManifestTooLarge(len));
    }

    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes).await?;

    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> FrameManifest {
        FrameManifest::Header(SessionHeader {
            transfer_id: Uuid::new_v4(),
            total_bytes: 1_048_576,
            total_files: 3,
            capabilities: vec!["atomic-writes".to_string()],
        })
    }

    fn item(size: u64) -> FrameManifest {
        FrameManifest::Item(ItemManifest {
            item_id: Uuid::new_v4(),
            kind: ItemKind::File,
            relative_path: "dir/sub/y.bin".to_string(),
            size,
            last: false,
        })
    }

    async fn roundtrip(manifest: &FrameManifest) -> FrameManifest {
        let (mut tx, mut rx) = tokio::io::duplex(64 * 1024);
        write_manifest(&mut tx, manifest).await.unwrap();
        read_manifest(&mut rx).await.unwrap()
    }

    #[tokio::test]
    async fn test_header_roundtrip() {
        let manifest = header();
        assert_eq!(roundtrip(&manifest).await, manifest);
        assert_eq!(manifest.payload_len(), 0);
    }

    #[tokio::test]
    async fn test_item_roundtrip_and_payload_len() {
        let manifest = item(4096);
        let decoded = roundtrip(&manifest).await;
        assert_eq!(decoded, manifest);
        assert_eq!(decoded.payload_len(), 4096);
    }

    #[tokio::test]
    async fn test_end_roundtrip() {
        let manifest = FrameManifest::End {};
        assert_eq!(roundtrip(&manifest).await, manifest);
    }

    #[tokio::test]
    async fn test_length_prefix_is_big_endian() {
        let (mut tx, mut rx) = tokio::io::duplex(64 * 1024);
        write_manifest(&mut tx, &FrameManifest::End {}).await.unwrap();

        let mut prefix = [0u8; 8];
        tokio::io::AsyncReadExt::read_exact(&mut rx, &mut prefix)
            .await
            .unwrap();
        let len = u64::from_be_bytes(prefix);
        assert!(len > 0 && len < 64);
    }

    #[tokio::test]
    async fn test_oversize_manifest_is_rejected() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_u64(&mut tx, MAX_MANIFEST_SIZE + 1)
            .await
            .unwrap();
        let result = read_manifest(&mut rx).await;
        assert!(matches!(result, Err(FrameDecodeError::ManifestTooLarge(_))));
    }

    #[tokio::test]
    async fn test_garbage_manifest_is_a_parse_error() {
        let (mut tx, mut rx) = tokio::io::duplex(256);
        let junk = b"{\"frame\":\"item\"}"; // missing required fields
        tokio::io::AsyncWriteExt::write_u64(&mut tx, junk.len() as u64)
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut tx, junk).await.unwrap();
        assert!(matches!(
            read_manifest(&mut rx).await,
            Err(FrameDecodeError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_manifest_is_an_io_error() {
        let (mut tx, mut rx) = tokio::io::duplex(256);
        tokio::io::AsyncWriteExt::write_u64(&mut tx, 100).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut tx, b"short").await.unwrap();
        drop(tx);
        assert!(matches!(
            read_manifest(&mut rx).await,
            Err(FrameDecodeError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_optional_fields_are_ignored() {
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        let json = format!(
            r#"{{"frame":"item","item_id":"{}","kind":"file","relative_path":"a.txt","size":5,"checksum":"beef"}}"#,
            Uuid::new_v4()
        );
        tokio::io::AsyncWriteExt::write_u64(&mut tx, json.len() as u64)
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut tx, json.as_bytes())
            .await
            .unwrap();

        let decoded = read_manifest(&mut rx).await.unwrap();
        match decoded {
            FrameManifest::Item(item) => {
                assert_eq!(item.relative_path, "a.txt");
                assert!(!item.last); // defaulted
            }
            other => panic!("unexpected manifest: {other:?}"),
        }
    }
}
