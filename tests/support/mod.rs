#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use vault_migrator::models::{Relevancy, StateRef, StateStatus, VaultRecord};

pub mod database;

pub const CASH: &str = "net.corda.finance.Cash";

pub fn state_ref(i: usize) -> StateRef {
    StateRef::new(format!("tx{:05}", i), 0)
}

/// A cash state whose payload names `participants` by owning key.
pub fn cash_state(i: usize, participants: &[&str]) -> VaultRecord {
    let participants: Vec<serde_json::Value> = participants
        .iter()
        .map(|key| serde_json::json!({ "name": format!("O={}", key), "owningKey": key }))
        .collect();
    let payload = serde_json::json!({ "participants": participants });

    raw_state(i, serde_json::to_vec(&payload).unwrap_or_default())
}

pub fn raw_state(i: usize, contract_state: Vec<u8>) -> VaultRecord {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    VaultRecord {
        state_ref: state_ref(i),
        contract_state_class_name: CASH.to_string(),
        state_status: StateStatus::Unconsumed,
        relevancy_status: Relevancy::NotRelevant,
        recorded_timestamp: base + Duration::seconds(i as i64),
        contract_state,
    }
}

pub fn cash_states(count: usize) -> Vec<VaultRecord> {
    (0..count).map(|i| cash_state(i, &["key-a", "key-b"])).collect()
}
