//! End-to-end auction and routing flows through `AuctionService`.

use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use verification_auction::{
    AuctionConfig, AuctionError, AuctionService, AuctionStore, BlockParams, BlockState, Credential,
    ManualClock, MemoryStore, RequestStatus, SqliteStore, StopReason,
};

const START: i64 = 1_700_000_000;

fn open_service(store: Arc<dyn AuctionStore>) -> (AuctionService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let service = assert_ok!(AuctionService::open(
        AuctionConfig::default(),
        store,
        clock.clone()
    ));
    (service, clock)
}

/// Reward is exactly 3.5 at creation and 4.0 half way to the deadline.
fn stepped_block(block_id: u64) -> BlockParams {
    BlockParams {
        block_id,
        price: 1.0,
        base_reward_rate: 1.0,
        float_reward_rate: 0.0,
        min_reward: 3.0,
        max_reward: 5.0,
        deadline: START + 100,
        growth_speed: Some(3.0f64.ln()),
    }
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

#[test]
fn reward_rises_from_creation_to_deadline() {
    let (service, clock) = open_service(Arc::new(MemoryStore::new()));
    let block = assert_ok!(service.register_block(BlockParams {
        block_id: 1,
        price: 10.0,
        base_reward_rate: 0.05,
        float_reward_rate: 0.02,
        min_reward: 1.0,
        max_reward: 10.0,
        deadline: START + 60,
        growth_speed: None,
    }));

    let at_start = assert_ok!(verification_auction::reward(&block, START));
    let at_deadline = assert_ok!(verification_auction::reward(&block, START + 60));
    assert!(approx(at_start, 2.394_330_9), "got {}", at_start);
    assert!(approx(at_deadline, 5.305_669_1), "got {}", at_deadline);

    // Past the deadline the block is expired and never offered again.
    clock.set(START + 61);
    assert_eq!(assert_ok!(service.block_state(1)), BlockState::Expired);
    let round = assert_ok!(service.tick());
    assert_eq!(round.eligible, 0);
}

#[test]
fn bid_rejected_then_accepted_once_reward_catches_up() {
    let store = Arc::new(MemoryStore::new());
    let (service, clock) = open_service(store.clone());
    assert_ok!(service.register_block(stepped_block(1)));
    assert_ok!(service.register_verifier(1, 4.0));

    let round = assert_ok!(service.tick());
    assert!(round.awards.is_empty());
    assert_eq!(assert_ok!(service.block_state(1)), BlockState::Active);

    clock.set(START + 50);
    let round = assert_ok!(service.tick());
    assert_eq!(round.awards.len(), 1);
    assert!(approx(round.awards[0].reward, 4.0));

    assert_eq!(assert_ok!(service.block_state(1)), BlockState::Verified);
    let leader = &service.leaderboard()[0];
    assert_eq!(leader.verifier_id, 1);
    assert!(approx(leader.total_score, 4.0));

    // The award reached the store.
    let saved = assert_ok!(store.load());
    assert!(saved.blocks[0].verified);
    assert!(approx(saved.verifiers[0].total_score, 4.0));
}

#[test]
fn submit_without_verifiers_creates_nothing() {
    let store = Arc::new(MemoryStore::new());
    let (service, _) = open_service(store.clone());

    let err = assert_err!(service.submit_verification(&[0x01], &[0xff, 0x10], &[0x02]));
    assert!(matches!(err, AuctionError::NoVerifiers));
    assert!(service.verifiers().is_empty());
    assert!(assert_ok!(store.load()).verifiers.is_empty());
}

#[test]
fn requests_are_routed_queued_and_settled() {
    let (service, _) = open_service(Arc::new(MemoryStore::new()));
    let alice = Credential::new(vec![0xa1]);
    let bob = Credential::new(vec![0xb0]);
    assert_ok!(service.register_credential(alice.clone()));
    assert_ok!(service.register_credential(bob.clone()));

    // 0x03 mod 2 == 1 -> second credentialed verifier.
    let first = assert_ok!(service.submit_verification(&[0x11], &[0x03], &[0x22]));
    let second = assert_ok!(service.submit_verification(&[0x12], &[0x00, 0x05], &[0x23]));
    assert_eq!(first.verifier_public_key, vec![0xb0]);

    let queue = assert_ok!(service.requests_for(&bob));
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[0].request_id, first.request_id);
    assert_eq!(queue[1].request_id, second.request_id);

    // Returning verifier sees the head of its queue.
    let again = assert_ok!(service.register_credential(bob.clone()));
    assert!(!again.created);
    assert_eq!(again.pending.unwrap().request_id, first.request_id);

    assert_ok!(service.report_result(&first.request_id, RequestStatus::Accepted));
    assert_ok!(service.report_result(&first.request_id, RequestStatus::Accepted));
    assert_eq!(
        assert_ok!(service.request(&first.request_id)).status,
        RequestStatus::Accepted
    );

    let again = assert_ok!(service.register_credential(bob));
    assert_eq!(again.pending.unwrap().request_id, second.request_id);
    assert!(assert_ok!(service.requests_for(&alice)).is_empty());
}

#[test]
fn state_survives_restart_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("auction.db");

    let request_id = {
        let store: Arc<dyn AuctionStore> = Arc::new(assert_ok!(SqliteStore::new(&path)));
        let (service, clock) = open_service(store);
        assert_ok!(service.register_block(stepped_block(1)));
        // Still below the bid at START + 50.
        assert_ok!(service.register_block(BlockParams {
            deadline: START + 1000,
            ..stepped_block(2)
        }));
        assert_ok!(service.register_verifier(1, 4.0));
        assert_ok!(service.register_credential(Credential::new(vec![0x01, 0x02])));
        let request = assert_ok!(service.submit_verification(&[0x09], &[0x07], &[0x08]));
        clock.set(START + 50);
        assert_ok!(service.tick());
        assert_ok!(service.shutdown());
        request.request_id
    };

    let store: Arc<dyn AuctionStore> = Arc::new(assert_ok!(SqliteStore::new(&path)));
    let (service, _) = open_service(store);
    let blocks = service.blocks();
    assert_eq!(blocks.len(), 2);
    assert!(blocks[0].verified);
    assert!(!blocks[1].verified);
    assert_eq!(service.verifiers().len(), 2);
    assert_eq!(
        assert_ok!(service.request(&request_id)).status,
        RequestStatus::Pending
    );

    // Restored ids stay taken.
    let err = assert_err!(service.register_block(stepped_block(1)));
    assert!(matches!(err, AuctionError::Validation(_)));
}

#[tokio::test(start_paused = true)]
async fn loop_awards_block_when_reward_reaches_bid() {
    let (service, clock) = open_service(Arc::new(MemoryStore::new()));
    assert_ok!(service.register_block(stepped_block(1)));
    assert_ok!(service.register_verifier(1, 4.0));

    tokio::spawn({
        let clock = clock.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            clock.set(START + 50);
        }
    });

    let summary = assert_ok!(service.run_auction_loop().await);
    assert_eq!(summary.stop, StopReason::NoEligibleBlocks);
    assert_eq!(summary.awards.len(), 1);
    assert!(summary.rounds > 1);
}
