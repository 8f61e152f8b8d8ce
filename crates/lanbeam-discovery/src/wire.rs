//! The discovery datagram codec.
//!
//! Every datagram is a single UTF-8 JSON object with a `type` tag. Decoding
//! is forward compatible two ways: datagrams with an unknown `type` are
//! ignored (not an error), and unknown optional fields inside a known type
//! are skipped. Encoding is total for well-formed bodies.
//!
//! Control-plane bodies ride the same wire; `transfer_request` bounds its
//! item preview so the datagram always fits one UDP packet, flagging the
//! cut with `truncated: true`.

use lanbeam_net::ConnectionType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Largest datagram we are willing to emit.
///
/// Conservative for 1500-byte MTUs once IP/UDP headers are paid; keeps
/// discovery traffic out of fragmentation entirely.
pub const MAX_DATAGRAM_SIZE: usize = 1400;

/// Fields common to every datagram: who sent it and how they present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// Sender endpoint as `ip:port`; the port is the sender's listen port.
    pub from: String,
    /// Display name.
    pub name: String,
    /// Platform string (e.g. `linux`, `windows`, `macos`).
    pub platform: String,
    /// Free-form system string (e.g. distro or OS version).
    pub system: String,
    /// Stable per-host identifier; the trust key for remembered save
    /// locations. Opaque and unauthenticated.
    pub signature: String,
}

/// `hello` body: presence advertisement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloBody {
    /// Common sender fields.
    #[serde(flatten)]
    pub origin: Origin,
    /// Avatar URL, opaque to the engine.
    #[serde(default)]
    pub avatar: String,
    /// The sender's own classification of its primary interface.
    pub connection_type: ConnectionType,
    /// The sender's primary interface name; part of peer identity.
    pub interface: String,
    /// Random value used to suppress loopback echoes of our own packets.
    pub nonce: u64,
}

/// Preview entry inside a `transfer_request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPreview {
    /// Logical item name.
    pub name: String,
    /// Size in bytes; `-1` for a folder whose size is computed in flight.
    pub size: i64,
    /// Item kind string (`file`, `folder`, `text`).
    pub kind: String,
}

/// `transfer_request` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequestBody {
    /// Common sender fields.
    #[serde(flatten)]
    pub origin: Origin,
    /// Session id chosen by the requester.
    pub transfer_id: Uuid,
    /// Aggregate payload size in bytes.
    pub total_size: u64,
    /// Number of items in the session.
    pub item_count: u64,
    /// Bounded preview of item names and sizes.
    pub items_preview: Vec<ItemPreview>,
    /// Whether the preview was cut to fit the datagram budget.
    #[serde(default)]
    pub truncated: bool,
}

/// `transfer_accept` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferAcceptBody {
    /// Common sender fields.
    #[serde(flatten)]
    pub origin: Origin,
    /// The accepted session id.
    pub transfer_id: Uuid,
    /// Destination directory on the receiver; opaque to the sender.
    pub save_location: String,
}

/// `transfer_decline` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferDeclineBody {
    /// Common sender fields.
    #[serde(flatten)]
    pub origin: Origin,
    /// The declined session id.
    pub transfer_id: Uuid,
    /// Human-readable reason, surfaced in the requester's failure.
    #[serde(default)]
    pub reason: String,
}

/// `transfer_cancel` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferCancelBody {
    /// Common sender fields.
    #[serde(flatten)]
    pub origin: Origin,
    /// The cancelled session id.
    pub transfer_id: Uuid,
}

/// A discovery datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Datagram {
    /// Presence advertisement.
    Hello(HelloBody),
    /// Graceful departure; evicts the peer immediately.
    Goodbye {
        /// Common sender fields.
        #[serde(flatten)]
        origin: Origin,
    },
    /// Ask a peer to receive a transfer.
    TransferRequest(TransferRequestBody),
    /// Accept a requested transfer.
    TransferAccept(TransferAcceptBody),
    /// Decline a requested transfer.
    TransferDecline(TransferDeclineBody),
    /// Abort a transfer in any pre-completion state.
    TransferCancel(TransferCancelBody),
}

impl Datagram {
    /// The sender fields of any datagram.
    #[must_use]
    pub fn origin(&self) -> &Origin {
        match self {
            Self::Hello(b) => &b.origin,
            Self::Goodbye { origin } => origin,
            Self::TransferRequest(b) => &b.origin,
            Self::TransferAccept(b) => &b.origin,
            Self::TransferDecline(b) => &b.origin,
            Self::TransferCancel(b) => &b.origin,
        }
    }

    /// Short tag for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello(_) => "hello",
            Self::Goodbye { .. } => "goodbye",
            Self::TransferRequest(_) => "transfer_request",
            Self::TransferAccept(_) => "transfer_accept",
            Self::TransferDecline(_) => "transfer_decline",
            Self::TransferCancel(_) => "transfer_cancel",
        }
    }
}

const KNOWN_TYPES: [&str; 6] = [
    "hello",
    "goodbye",
    "transfer_request",
    "transfer_accept",
    "transfer_decline",
    "transfer_cancel",
];

/// Encode a datagram to its wire bytes.
#[must_use]
pub fn encode(datagram: &Datagram) -> Vec<u8> {
    // Serialization of these bodies cannot fail: no maps with non-string
    // keys, no non-finite floats.
    serde_json::to_vec(datagram).expect("datagram serialization is total")
}

/// Decode wire bytes.
///
/// Returns `Ok(None)` for well-formed JSON carrying an unknown `type` (the
/// compatibility contract says such datagrams are ignored, not rejected).
///
/// # Errors
///
/// Fails on invalid JSON, a missing `type` tag, or missing required fields
/// of a known type.
pub fn decode(bytes: &[u8]) -> Result<Option<Datagram>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;

    match value.get("type").and_then(|t| t.as_str()) {
        Some(t) if KNOWN_TYPES.contains(&t) => serde_json::from_value(value).map(Some),
        Some(_) => Ok(None),
        None => {
            // Force a proper serde error with context.
            serde_json::from_value::<Datagram>(value).map(Some)
        }
    }
}

/// Shrink a `transfer_request` body's item preview until its encoding fits
/// [`MAX_DATAGRAM_SIZE`].
///
/// Sets `truncated` when anything was dropped. The rest of the body is
/// never cut; a pathological origin that alone exceeds the budget is the
/// caller's bug, not this function's.
#[must_use]
pub fn bound_request(mut body: TransferRequestBody) -> TransferRequestBody {
    while encode(&Datagram::TransferRequest(body.clone())).len() > MAX_DATAGRAM_SIZE
        && !body.items_preview.is_empty()
    {
        body.items_preview.pop();
        body.truncated = true;
    }
    body
}

/// Encode a `transfer_request` with the preview bounded by
/// [`bound_request`].
#[must_use]
pub fn encode_request_bounded(body: TransferRequestBody) -> Vec<u8> {
    encode(&Datagram::TransferRequest(bound_request(body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Origin {
        Origin {
            from: "192.168.1.10:6442".to_string(),
            name: "workbench".to_string(),
            platform: "linux".to_string(),
            system: "Fedora Linux 40".to_string(),
            signature: "sig-1234".to_string(),
        }
    }

    fn hello() -> Datagram {
        Datagram::Hello(HelloBody {
            origin: origin(),
            avatar: "http://192.168.1.10:6442/avatar.png".to_string(),
            connection_type: ConnectionType::Ethernet,
            interface: "eth0".to_string(),
            nonce: 0xDEAD_BEEF,
        })
    }

    #[test]
    fn test_hello_roundtrip() {
        let bytes = encode(&hello());
        let decoded = decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded, hello());
        assert_eq!(decoded.kind(), "hello");
    }

    #[test]
    fn test_tag_is_snake_case_on_wire() {
        let bytes = encode(&hello());
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "hello");
        assert_eq!(value["connection_type"], "ethernet");
        // Origin fields are flattened to the top level.
        assert_eq!(value["name"], "workbench");
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let bytes = br#"{"type":"hologram","from":"1.2.3.4:6442"}"#;
        assert!(decode(bytes).unwrap().is_none());
    }

    #[test]
    fn test_unknown_optional_fields_are_ignored() {
        let mut value: serde_json::Value = serde_json::from_slice(&encode(&hello())).unwrap();
        value["future_field"] = serde_json::json!({"nested": true});
        let bytes = serde_json::to_vec(&value).unwrap();
        let decoded = decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded, hello());
    }

    #[test]
    fn test_missing_required_field_is_an_error() {
        let bytes = br#"{"type":"hello","from":"1.2.3.4:6442","name":"x"}"#;
        assert!(decode(bytes).is_err());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(decode(b"not json at all").is_err());
    }

    #[test]
    fn test_request_roundtrip() {
        let body = TransferRequestBody {
            origin: origin(),
            transfer_id: Uuid::new_v4(),
            total_size: 1_048_576,
            item_count: 2,
            items_preview: vec![
                ItemPreview {
                    name: "a.bin".to_string(),
                    size: 1_048_571,
                    kind: "file".to_string(),
                },
                ItemPreview {
                    name: "note 📝".to_string(),
                    size: 5,
                    kind: "text".to_string(),
                },
            ],
            truncated: false,
        };
        let datagram = Datagram::TransferRequest(body);
        let decoded = decode(&encode(&datagram)).unwrap().unwrap();
        assert_eq!(decoded, datagram);
    }

    #[test]
    fn test_oversize_preview_is_truncated() {
        let items: Vec<ItemPreview> = (0..200)
            .map(|i| ItemPreview {
                name: format!("some-rather-long-file-name-{i:04}.bin"),
                size: 1024,
                kind: "file".to_string(),
            })
            .collect();
        let body = TransferRequestBody {
            origin: origin(),
            transfer_id: Uuid::new_v4(),
            total_size: 200 * 1024,
            item_count: 200,
            items_preview: items,
            truncated: false,
        };

        let bytes = encode_request_bounded(body);
        assert!(bytes.len() <= MAX_DATAGRAM_SIZE);

        let decoded = decode(&bytes).unwrap().unwrap();
        match decoded {
            Datagram::TransferRequest(b) => {
                assert!(b.truncated);
                assert!((b.items_preview.len() as u64) < b.item_count);
                // Totals survive the cut.
                assert_eq!(b.item_count, 200);
                assert_eq!(b.total_size, 200 * 1024);
            }
            other => panic!("unexpected datagram: {other:?}"),
        }
    }

    #[test]
    fn test_small_preview_is_not_truncated() {
        let body = TransferRequestBody {
            origin: origin(),
            transfer_id: Uuid::new_v4(),
            total_size: 5,
            item_count: 1,
            items_preview: vec![ItemPreview {
                name: "x.txt".to_string(),
                size: 5,
                kind: "file".to_string(),
            }],
            truncated: false,
        };
        let bytes = encode_request_bounded(body);
        let decoded = decode(&bytes).unwrap().unwrap();
        match decoded {
            Datagram::TransferRequest(b) => assert!(!b.truncated),
            other => panic!("unexpected datagram: {other:?}"),
        }
    }

    #[test]
    fn test_accept_and_decline_roundtrip() {
        let id = Uuid::new_v4();
        let accept = Datagram::TransferAccept(TransferAcceptBody {
            origin: origin(),
            transfer_id: id,
            save_location: "/home/user/Downloads".to_string(),
        });
        let decline = Datagram::TransferDecline(TransferDeclineBody {
            origin: origin(),
            transfer_id: id,
            reason: "no thanks".to_string(),
        });
        assert_eq!(decode(&encode(&accept)).unwrap().unwrap(), accept);
        assert_eq!(decode(&encode(&decline)).unwrap().unwrap(), decline);
    }
}
