//! Integration tests for the handshake deadline
//!
//! Time is paused so the default 8000 ms deadline elapses instantly.

mod common;

use npcman::runtime::loopback::{Behavior, ScriptedConnector};
use npcman::runtime::{ManagerConfig, NoHumans, NpcManager, Phase, ScriptId};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_hanging_handshake_times_out_at_default_deadline() {
    let connector = ScriptedConnector::new(Behavior::Hang);
    let npcs = common::manager(&connector);
    let started = Instant::now();

    let p = npcs.create("Guard", ScriptId::new("patrol")).unwrap();

    tokio::time::sleep(Duration::from_millis(7999)).await;
    assert_eq!(p.phase(), Phase::Pending);

    p.disconnected().await;
    assert!(started.elapsed() >= Duration::from_millis(8000));
    assert_eq!(p.phase(), Phase::Closed);
    assert!(p.bound_handle().is_none());
    assert_eq!(npcs.count(), 0);

    let ready = tokio::time::timeout(Duration::from_secs(1), p.ready()).await;
    assert!(ready.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_passes_through_closing_from_pending() {
    let connector = ScriptedConnector::new(Behavior::IgnoreCancel { after_ms: 9000 });
    let npcs = common::manager(&connector);

    let p = npcs.create("Guard", ScriptId::new("patrol")).unwrap();

    tokio::time::sleep(Duration::from_millis(8500)).await;
    assert_eq!(p.phase(), Phase::ClosingFromPending);
    assert!(p.is_connecting() && p.is_disconnecting());
    assert_eq!(npcs.count(), 1);

    p.disconnected().await;
    assert_eq!(connector.issued(), 1);
    assert_eq!(connector.live_handles(), 0, "late handle must be released");
}

#[tokio::test(start_paused = true)]
async fn test_configured_deadline_is_honored() {
    let connector = ScriptedConnector::new(Behavior::succeed_after(300));
    let config = ManagerConfig {
        connect_timeout_ms: 200,
        ..common::config()
    };
    let npcs = NpcManager::new(config, Arc::new(connector.clone()), Arc::new(NoHumans)).unwrap();

    let p = npcs.create("Guard", ScriptId::new("patrol")).unwrap();
    p.disconnected().await;

    assert_eq!(connector.issued(), 0);
    assert_eq!(npcs.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_just_inside_deadline_goes_live() {
    let connector = ScriptedConnector::new(Behavior::succeed_after(7900));
    let npcs = common::manager(&connector);

    let p = npcs.create("Guard", ScriptId::new("patrol")).unwrap();
    p.ready().await;
    assert_eq!(p.phase(), Phase::Live);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(p.phase(), Phase::Live, "a live participant has no deadline");

    npcs.dispose().await;
}
