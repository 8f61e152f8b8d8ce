// Property tests for the wire codecs and naming policy.

use lanbeam_discovery::{
    Datagram, ItemPreview, Origin, TransferRequestBody, bound_request, wire, MAX_DATAGRAM_SIZE,
};
use lanbeam_files::numbered_name;
use proptest::prelude::*;
use uuid::Uuid;

fn arbitrary_origin() -> impl Strategy<Value = Origin> {
    (
        "[a-zA-Z0-9 ._-]{1,32}",
        "[a-zA-Z0-9 ._-]{1,32}",
        "[a-zA-Z0-9 ._-]{1,32}",
    )
        .prop_map(|(name, system, signature)| Origin {
            from: "192.168.1.10:6442".to_string(),
            name,
            platform: "linux".to_string(),
            system,
            signature,
        })
}

fn arbitrary_preview() -> impl Strategy<Value = Vec<ItemPreview>> {
    proptest::collection::vec(
        ("[a-zA-Z0-9 ._\\-\u{4e00}-\u{4eff}]{1,64}", -1i64..=1_000_000_000i64).prop_map(
            |(name, size)| ItemPreview {
                name,
                size,
                kind: "file".to_string(),
            },
        ),
        0..100,
    )
}

proptest! {
    #[test]
    fn prop_request_roundtrip(origin in arbitrary_origin(), preview in arbitrary_preview()) {
        let body = TransferRequestBody {
            origin,
            transfer_id: Uuid::new_v4(),
            total_size: preview.iter().map(|p| p.size.max(0) as u64).sum(),
            item_count: preview.len() as u64,
            items_preview: preview,
            truncated: false,
        };
        let datagram = Datagram::TransferRequest(body);
        let decoded = wire::decode(&wire::encode(&datagram)).unwrap().unwrap();
        prop_assert_eq!(decoded, datagram);
    }

    #[test]
    fn prop_bounded_request_always_fits(origin in arbitrary_origin(), preview in arbitrary_preview()) {
        let body = TransferRequestBody {
            origin,
            transfer_id: Uuid::new_v4(),
            total_size: 0,
            item_count: preview.len() as u64,
            items_preview: preview,
            truncated: false,
        };
        let before = body.items_preview.len();
        let bounded = bound_request(body);
        let bytes = wire::encode(&Datagram::TransferRequest(bounded.clone()));

        prop_assert!(bytes.len() <= MAX_DATAGRAM_SIZE);
        // Totals never shrink, and the truncated flag tells the truth.
        prop_assert_eq!(bounded.item_count as usize, before);
        prop_assert_eq!(bounded.truncated, bounded.items_preview.len() < before);
    }

    #[test]
    fn prop_numbered_name_keeps_extension(stem in "[a-zA-Z0-9_-]{1,20}", n in 1u32..1000) {
        let name = format!("{stem}.txt");
        let numbered = numbered_name(&name, n);
        prop_assert!(numbered.ends_with(".txt"));
        let marker = format!("({})", n);
        prop_assert!(numbered.contains(&marker));
        prop_assert!(numbered.starts_with(&stem));
    }

    #[test]
    fn prop_numbered_name_without_extension_appends(stem in "[a-zA-Z0-9_-]{1,20}", n in 1u32..1000) {
        let numbered = numbered_name(&stem, n);
        prop_assert_eq!(numbered, format!("{stem} ({n})"));
    }

    #[test]
    fn prop_hello_roundtrip_with_unicode_names(name in "\\PC{1,32}") {
        let datagram = Datagram::Hello(lanbeam_discovery::wire::HelloBody {
            origin: Origin {
                from: "10.0.0.2:6442".to_string(),
                name,
                platform: "linux".to_string(),
                system: "prop".to_string(),
                signature: "sig".to_string(),
            },
            avatar: String::new(),
            connection_type: lanbeam_net::ConnectionType::Wifi,
            interface: "wlan0".to_string(),
            nonce: 42,
        });
        let decoded = wire::decode(&wire::encode(&datagram)).unwrap().unwrap();
        prop_assert_eq!(decoded, datagram);
    }
}
