use session_server::domain::{PeerId, ReplicationError};
use session_server::use_cases::level::{
    CHECKPOINT_LAST, DOORS_ACTIVATED, GATE_OPEN, KEYS_ANY_COLLECTED, KEYS_COLLECTED, VICTORY,
    door_key, lit_key, switch_key,
};
use session_server::use_cases::{LevelLayout, ObserverReplica, SessionHandle, SessionSettings};
use std::{sync::Arc, time::Duration};

const WAIT: Duration = Duration::from_secs(5);

fn start_session() -> SessionHandle {
    let layout = LevelLayout {
        door_travel_ticks: 2,
        gate_delay_ms: 20,
        ..LevelLayout::default()
    };
    let settings = SessionSettings {
        event_channel_capacity: 64,
        update_broadcast_capacity: 256,
        tick_interval: Duration::from_millis(5),
        join_timeout: Duration::from_millis(200),
    };
    SessionHandle::start("convergence", Arc::new(layout), &settings).expect("session should start")
}

async fn joined(session: &SessionHandle, peer: u64) -> ObserverReplica {
    let mut replica = session.join(PeerId(peer)).await.expect("join should succeed");
    tokio::time::timeout(WAIT, replica.sync())
        .await
        .expect("join should complete")
        .expect("sync should succeed");
    replica
}

// Applies updates until the replica satisfies `pred`.
async fn until(replica: &mut ObserverReplica, pred: impl Fn(&ObserverReplica) -> bool) {
    tokio::time::timeout(WAIT, async {
        while !pred(replica) {
            replica.recv().await.expect("update should apply");
        }
    })
    .await
    .expect("replica should converge");
}

fn flag(replica: &ObserverReplica, key: &str) -> bool {
    replica.read_bool(key).unwrap_or(false)
}

#[tokio::test]
async fn when_observer_proposes_a_write_then_every_observer_converges() {
    let session = start_session();
    let mut alice = joined(&session, 1).await;
    let mut bob = joined(&session, 2).await;

    alice
        .propose_write(&switch_key("C"), true)
        .await
        .expect("proposal should be sent");

    until(&mut alice, |r| flag(r, "switch.C")).await;
    until(&mut bob, |r| flag(r, "switch.C")).await;
    assert_eq!(alice.snapshot().value("switch.C"), bob.snapshot().value("switch.C"));
}

#[tokio::test]
async fn when_peer_joins_late_then_snapshot_carries_current_state() {
    let session = start_session();
    let mut early = joined(&session, 1).await;

    early
        .propose_write(&switch_key("A"), true)
        .await
        .expect("proposal should be sent");
    until(&mut early, |r| flag(r, &door_key("B"))).await;

    let late = joined(&session, 2).await;

    assert!(flag(&late, &switch_key("A")));
    assert!(flag(&late, &door_key("B")));
}

#[tokio::test]
async fn when_one_shot_switch_is_reset_then_it_stays_pressed() {
    let session = start_session();
    let mut replica = joined(&session, 1).await;

    replica.propose_write("switch.B", true).await.unwrap();
    until(&mut replica, |r| flag(r, "door.A")).await;

    replica.propose_write("switch.B", false).await.unwrap();
    // Proposals are handled in order; once the marker lands the reset was decided.
    replica.propose_write("switch.C", true).await.unwrap();
    until(&mut replica, |r| flag(r, "switch.C")).await;

    assert!(flag(&replica, "switch.B"));
    assert!(flag(&replica, "door.A"));
}

#[tokio::test]
async fn when_observer_writes_directly_then_write_is_unauthorized() {
    let session = start_session();
    let mut replica = joined(&session, 1).await;

    let result = replica.write("switch.C", true);

    assert!(matches!(
        result,
        Err(ReplicationError::UnauthorizedWrite { .. })
    ));
    assert!(!flag(&replica, "switch.C"));
}

#[tokio::test]
async fn when_key_door_is_used_without_its_key_then_it_stays_shut() {
    let session = start_session();
    let mut replica = joined(&session, 1).await;

    replica.use_key_door("lock.A").await.unwrap();
    replica.propose_add(KEYS_COLLECTED, "KeyA").await.unwrap();
    until(&mut replica, |r| flag(r, KEYS_ANY_COLLECTED)).await;

    assert!(replica.has_key("KeyA").unwrap());
    assert!(!replica.contains(DOORS_ACTIVATED, "lock.A").unwrap());

    replica.use_key_door("lock.A").await.unwrap();
    until(&mut replica, |r| flag(r, &lit_key("lamp.A2"))).await;

    assert!(replica.contains(DOORS_ACTIVATED, "lock.A").unwrap());
    assert!(flag(&replica, &lit_key("lamp.A1")));
    assert!(!flag(&replica, &lit_key("lamp.B1")));
}

#[tokio::test]
async fn when_all_doors_are_activated_then_gate_opens_and_victory_follows() {
    let session = start_session();
    let mut replica = joined(&session, 1).await;

    for key in ["KeyA", "KeyB", "KeyC"] {
        replica.propose_add(KEYS_COLLECTED, key).await.unwrap();
    }
    for door in ["lock.A", "lock.B", "lock.C"] {
        replica.use_key_door(door).await.unwrap();
    }

    until(&mut replica, |r| flag(r, GATE_OPEN)).await;
    assert!(!flag(&replica, VICTORY));

    until(&mut replica, |r| flag(r, VICTORY)).await;
}

#[tokio::test]
async fn when_earlier_checkpoint_is_touched_again_then_it_becomes_the_respawn_point() {
    let session = start_session();
    let mut replica = joined(&session, 1).await;

    for index in [0, 1, 0] {
        replica.activate_checkpoint(index).await.unwrap();
        until(&mut replica, |r| {
            r.read_int(CHECKPOINT_LAST).unwrap_or(-1) == i64::from(index)
        })
        .await;
    }

    assert_eq!(replica.read_int(CHECKPOINT_LAST).unwrap(), 0);
    assert!(replica.contains("checkpoints.activated", "1").unwrap());
}

#[tokio::test]
async fn when_session_shuts_down_then_handle_reports_closed() {
    let session = start_session();
    let replica = joined(&session, 1).await;

    session.shutdown();

    tokio::time::timeout(WAIT, async {
        while !session.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session task should stop");

    assert_eq!(replica.leave().await, Err(ReplicationError::SessionClosed));
}
