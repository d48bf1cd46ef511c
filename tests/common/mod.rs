//! Shared fixtures for integration tests

#![allow(dead_code)]

use npcman::runtime::loopback::{Behavior, ScriptedConnector};
use npcman::runtime::{HumanRoster, LiveNames, ManagerConfig, NoHumans, NpcManager};
use std::sync::Arc;

pub fn config() -> ManagerConfig {
    ManagerConfig {
        name_seed: Some(0x5eed),
        ..ManagerConfig::default()
    }
}

pub fn manager_with(connector: &ScriptedConnector, humans: Arc<dyn LiveNames>) -> NpcManager {
    NpcManager::new(config(), Arc::new(connector.clone()), humans).expect("valid config")
}

pub fn manager(connector: &ScriptedConnector) -> NpcManager {
    manager_with(connector, Arc::new(NoHumans))
}

pub fn roster_manager(default: Behavior) -> (ScriptedConnector, Arc<HumanRoster>, NpcManager) {
    let connector = ScriptedConnector::new(default);
    let roster = Arc::new(HumanRoster::new());
    let manager = manager_with(&connector, roster.clone());
    (connector, roster, manager)
}
