//! Query behaviour every backend must share.

use serde_json::Map;

use nftsync_core::{ContractEvent, EventKind, EventQueries, EventSink, EventType};
use nftsync_storage::AnyStorage;

const ALICE: &str = "0x00000000000000000000000000000000000000a1";
const BOB: &str = "0x00000000000000000000000000000000000000b2";

fn event(tx: &str, block: u64, log_index: u64, kind: EventKind) -> ContractEvent {
    ContractEvent {
        transaction_hash: tx.into(),
        block_number: block,
        log_index,
        timestamp: 1_700_000_000 + block,
        kind,
        raw_data: Map::new(),
    }
}

fn registered(user: &str) -> EventKind {
    EventKind::UserRegistered { user: user.into() }
}

fn minted(to: &str, token_id: &str) -> EventKind {
    EventKind::NftMinted {
        to: to.into(),
        token_id: token_id.into(),
        metadata_uri: format!("ipfs://bafy/{token_id}.json"),
    }
}

fn blacklisted(user: &str) -> EventKind {
    EventKind::UserBlacklisted { user: user.into() }
}

fn removed(user: &str) -> EventKind {
    EventKind::UserRemovedFromBlacklist { user: user.into() }
}

fn fees(registration: &str, minting: &str) -> EventKind {
    EventKind::FeesUpdated {
        registration_fee: registration.into(),
        minting_fee: minting.into(),
    }
}

async fn backends() -> Vec<AnyStorage> {
    let mut out = vec![AnyStorage::connect("memory:").await.unwrap()];
    #[cfg(feature = "sqlite")]
    out.push(AnyStorage::connect("sqlite::memory:").await.unwrap());
    out
}

async fn seed(store: &AnyStorage) {
    let events = [
        event("0x01", 10, 0, registered(ALICE)),
        event("0x02", 12, 1, minted(ALICE, "1")),
        event("0x02", 12, 0, registered(BOB)),
        event("0x03", 15, 0, minted(BOB, "2")),
        event("0x04", 20, 3, fees("100", "10")),
        event("0x05", 25, 0, fees("200", "20")),
        event("0x06", 30, 0, minted(ALICE, "3")),
    ];
    for ev in events {
        store.record(ev).await.unwrap();
    }
}

#[tokio::test]
async fn duplicate_key_keeps_first_timestamp() {
    for store in backends().await {
        let a = event("0xaa", 10, 0, registered(ALICE));
        let mut b = a.clone();
        b.timestamp = a.timestamp + 60;

        let first = store.record(a).await.unwrap();
        let second = store.record(b).await.unwrap();

        assert_eq!(first.id, second.id, "{}", store.backend());
        assert_eq!(second.event.timestamp, 1_700_000_010, "{}", store.backend());
        assert_eq!(store.event_count().await.unwrap(), 1, "{}", store.backend());
    }
}

#[tokio::test]
async fn lists_are_newest_first_with_log_index_tiebreak() {
    for store in backends().await {
        seed(&store).await;
        let all = store.all().await.unwrap();
        let keys: Vec<(u64, u64)> = all.iter().map(|e| (e.event.block_number, e.event.log_index)).collect();
        assert_eq!(
            keys,
            vec![(30, 0), (25, 0), (20, 3), (15, 0), (12, 1), (12, 0), (10, 0)],
            "{}",
            store.backend()
        );
    }
}

#[tokio::test]
async fn address_queries_are_case_insensitive() {
    for store in backends().await {
        seed(&store).await;
        let upper = ALICE.to_uppercase().replacen("0X", "0x", 1);

        let by_addr = store.by_address(&upper).await.unwrap();
        assert_eq!(by_addr.len(), 3, "{}", store.backend());

        let nfts = store.user_nfts(&upper).await.unwrap();
        let ids: Vec<_> = nfts
            .iter()
            .map(|e| match &e.event.kind {
                EventKind::NftMinted { token_id, .. } => token_id.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["3", "1"], "{}", store.backend());

        assert!(store.is_user_registered(&upper).await.unwrap());
        assert!(!store.is_user_registered("0x00000000000000000000000000000000000000c3").await.unwrap());
    }
}

#[tokio::test]
async fn type_and_range_filters() {
    for store in backends().await {
        seed(&store).await;
        assert_eq!(store.by_type(EventType::NftMinted).await.unwrap().len(), 3);
        assert_eq!(store.by_type(EventType::UserBlacklisted).await.unwrap().len(), 0);

        let range = store.by_block_range(12, 20).await.unwrap();
        let blocks: Vec<u64> = range.iter().map(|e| e.event.block_number).collect();
        assert_eq!(blocks, vec![20, 15, 12, 12], "{}", store.backend());
        assert!(store.by_block_range(21, 20).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn latest_fees_update_is_highest_block() {
    for store in backends().await {
        assert!(store.latest_fees_update().await.unwrap().is_none());
        seed(&store).await;
        let latest = store.latest_fees_update().await.unwrap().unwrap();
        assert_eq!(latest.event.kind, fees("200", "20"), "{}", store.backend());
    }
}

#[tokio::test]
async fn blacklist_status_follows_chain_order_not_insert_order() {
    for store in backends().await {
        // Inserted out of chain order: blacklisting at block 10, removal at block 5.
        store.record(event("0xb1", 10, 0, blacklisted("0x1"))).await.unwrap();
        store.record(event("0xb2", 5, 0, removed("0x1"))).await.unwrap();
        assert!(store.is_user_blacklisted("0x1").await.unwrap(), "{}", store.backend());

        store.record(event("0xb3", 10, 4, removed("0x1"))).await.unwrap();
        assert!(!store.is_user_blacklisted("0x1").await.unwrap(), "{}", store.backend());

        assert!(!store.is_user_blacklisted(ALICE).await.unwrap());
    }
}
