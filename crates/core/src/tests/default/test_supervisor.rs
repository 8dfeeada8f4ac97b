use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crate::session::PeerSession;
use crate::session::SessionConfig;
use crate::switchboard::BlacklistDuration;
use crate::switchboard::Switchboard;
use crate::switchboard::SwitchboardBuilder;
use crate::switchboard::SwitchboardEvent;
use crate::switchboard::SwitchboardEventKind;
use crate::tests::establish_pair;

fn quiet_board() -> SwitchboardBuilder {
    SwitchboardBuilder::new("switchboard-tests", "room-1")
        .rendezvous(vec![])
        .skip_extra_trackers()
        .client_timeout(Duration::from_millis(500))
}

#[tokio::test]
async fn test_identity_accessors_are_consistent() {
    let board = quiet_board().build();
    assert_eq!(board.full_id().len(), 40);
    assert_eq!(board.short_id(), &board.full_id()[..20]);
    assert_eq!(board.peer_id(), board.short_id());

    let seed = board.secret_seed();
    let again = quiet_board()
        .seed(crate::ecc::Seed::from_base58(&seed).unwrap())
        .build();
    assert_eq!(again.full_id(), board.full_id());
}

#[tokio::test]
async fn test_realm_scopes_the_info_hash() {
    let a = SwitchboardBuilder::new("app-a", "same-key").build();
    let b = SwitchboardBuilder::new("app-b", "same-key").build();
    assert_ne!(a.info_hash(), b.info_hash());
}

#[tokio::test]
async fn test_admission_gate_prefix_match() {
    let board = quiet_board().build();
    board.find_host("abcd").await.unwrap();

    // Prefix-compatible sighting is admitted.
    assert!(!board.should_block_connection("abcdef1234abcdef1234"));
    // Prefix-incompatible sighting is rejected before any session work.
    assert!(board.should_block_connection("abceef1234abcdef1234"));
}

#[tokio::test]
async fn test_admission_gate_emits_peer_seen() {
    let board = quiet_board().build();
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    board
        .events()
        .on(SwitchboardEventKind::PeerSeen, move |event| {
            if let SwitchboardEvent::PeerSeen(id) = event {
                sink.lock().unwrap().push(id.clone());
            }
        });

    board.should_block_connection("cafebabe000011112222");
    assert_eq!(seen.lock().unwrap().as_slice(), ["cafebabe000011112222"]);
}

#[tokio::test]
async fn test_blacklist_crossing_and_expiry() {
    let board = quiet_board()
        .client_max_retries(1)
        .blacklist_duration(BlacklistDuration::Timed(Duration::from_millis(300)))
        .build();

    let blacklisted = Arc::new(AtomicUsize::new(0));
    let counter = blacklisted.clone();
    board
        .events()
        .on(SwitchboardEventKind::PeerBlacklisted, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    let peer = PeerSession::new(SessionConfig::default()).await.unwrap();
    peer.set_peer_id("feedface00feedface00");

    board.add_peer_failure(&peer, Some(1));
    assert!(!board.is_blacklisted("feedface00feedface00"));

    board.add_peer_failure(&peer, Some(1));
    assert!(board.is_blacklisted("feedface00feedface00"));
    assert_eq!(blacklisted.load(Ordering::SeqCst), 1);
    assert!(board.should_block_connection("feedface00feedface00"));

    tokio::time::sleep(Duration::from_millis(450)).await;
    assert!(!board.is_blacklisted("feedface00feedface00"));
}

#[tokio::test]
async fn test_default_failure_increment_blacklists_immediately() {
    let board = quiet_board().build();
    let peer = PeerSession::new(SessionConfig::default()).await.unwrap();
    peer.set_peer_id("deadbeef00deadbeef00");

    board.add_peer_failure(&peer, None);
    assert!(board.is_blacklisted("deadbeef00deadbeef00"));
}

/// Full authentication round trip between two supervisors over a paired
/// in-process transport.
async fn authenticate_pair(board_a: &Switchboard, board_b: &Switchboard) {
    let (session_a, session_b) = establish_pair().await;
    session_a.set_peer_id(board_b.short_id());
    session_b.set_peer_id(board_a.short_id());

    board_a.admit_candidate("test://a", session_a).await;
    board_b.admit_candidate("test://b", session_b).await;
}

fn collect_peers(board: &Switchboard) -> Arc<Mutex<Vec<PeerSession>>> {
    let peers: Arc<Mutex<Vec<PeerSession>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = peers.clone();
    board.events().on(SwitchboardEventKind::Peer, move |event| {
        if let SwitchboardEvent::Peer(peer) = event {
            sink.lock().unwrap().push(peer.clone());
        }
    });
    peers
}

#[tokio::test]
async fn test_signed_handshake_round_trip() {
    let board_a = quiet_board().build();
    let board_b = quiet_board().build();

    let peers_a = collect_peers(&board_a);
    let peers_b = collect_peers(&board_b);

    authenticate_pair(&board_a, &board_b).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let peers_a = peers_a.lock().unwrap();
    let peers_b = peers_b.lock().unwrap();
    assert_eq!(peers_a.len(), 1);
    assert_eq!(peers_b.len(), 1);
    assert_eq!(
        peers_a[0].verified_full_id().as_deref(),
        Some(board_b.full_id())
    );
    assert_eq!(
        peers_b[0].verified_full_id().as_deref(),
        Some(board_a.full_id())
    );
    assert_eq!(board_a.connected_peers().len(), 1);

    // Uniqueness: the authenticated id is now gated.
    assert!(board_a.should_block_connection(board_b.short_id()));
}

#[tokio::test]
async fn test_wrong_advertised_id_fails_authentication() {
    let board_a = quiet_board().client_max_retries(0).build();
    let board_b = quiet_board().build();

    let peers_a = collect_peers(&board_a);
    let warns = Arc::new(AtomicUsize::new(0));
    let counter = warns.clone();
    board_a
        .events()
        .on(SwitchboardEventKind::Warn, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    let (session_a, session_b) = establish_pair().await;
    // The rendezvous lied about who is on the other end.
    session_a.set_peer_id("0000000000000000000000000000000000000000");
    session_b.set_peer_id(board_a.short_id());

    board_a.admit_candidate("test://a", session_a.clone()).await;
    board_b.admit_candidate("test://b", session_b).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(peers_a.lock().unwrap().is_empty());
    assert!(warns.load(Ordering::SeqCst) >= 1);
    assert!(session_a.is_closed());
    assert!(board_a.is_blacklisted("0000000000000000000000000000000000000000"));
}

#[tokio::test]
async fn test_auth_timeout_counts_as_failure() {
    let board = quiet_board()
        .client_timeout(Duration::from_millis(100))
        .client_max_retries(0)
        .build();

    // A candidate that never completes: its offer is never answered, so
    // the default channel never opens and no intro ever arrives.
    let mute = PeerSession::new(SessionConfig {
        initiator: true,
        ..SessionConfig::default()
    })
    .await
    .unwrap();
    mute.handshake(None).await.unwrap();
    mute.set_peer_id("feeble00feeble00feeb");

    board.admit_candidate("test://mute", mute.clone()).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(mute.is_closed());
    assert!(board.is_blacklisted("feeble00feeble00feeb"));
}

#[tokio::test]
async fn test_kill_is_idempotent_and_terminal() {
    let board = quiet_board().build();
    board.host(None).await.unwrap();

    let kills = Arc::new(AtomicUsize::new(0));
    let counter = kills.clone();
    board.events().on(SwitchboardEventKind::Kill, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    board.kill(None, true).await;
    board.kill(None, true).await;

    assert_eq!(kills.load(Ordering::SeqCst), 1);
    assert!(board.is_killed());
    assert!(matches!(
        board.host(None).await,
        Err(crate::error::Error::Killed)
    ));
}

#[tokio::test]
async fn test_killed_board_closes_candidates() {
    let board = quiet_board().build();
    board.kill(None, false).await;

    let (session_a, _session_b) = establish_pair().await;
    board.admit_candidate("test://late", session_a.clone()).await;
    assert!(session_a.is_closed());
}
