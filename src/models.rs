use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ===== State References =====

/// Stable reference to a vault state: the transaction that produced it plus the
/// index of the output within that transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateRef {
    pub txhash: String,
    pub index: i32,
}

impl StateRef {
    pub fn new(txhash: impl Into<String>, index: i32) -> Self {
        Self {
            txhash: txhash.into(),
            index,
        }
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.txhash, self.index)
    }
}

// ===== Status Columns =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStatus {
    Unconsumed,
    Consumed,
}

impl StateStatus {
    pub fn code(self) -> i16 {
        match self {
            StateStatus::Unconsumed => 0,
            StateStatus::Consumed => 1,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(StateStatus::Unconsumed),
            1 => Some(StateStatus::Consumed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relevancy {
    Relevant,
    NotRelevant,
}

impl Relevancy {
    pub fn code(self) -> i16 {
        match self {
            Relevancy::Relevant => 0,
            Relevancy::NotRelevant => 1,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Relevancy::Relevant),
            1 => Some(Relevancy::NotRelevant),
            _ => None,
        }
    }
}

// ===== Vault Rows =====

/// One persisted vault state as read by a page query.
///
/// The contract payload is opaque to the migration engine; only the transform
/// knows how to decode it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub state_ref: StateRef,
    pub contract_state_class_name: String,
    pub state_status: StateStatus,
    pub relevancy_status: Relevancy,
    pub recorded_timestamp: DateTime<Utc>,
    pub contract_state: Vec<u8>,
}

/// Companion row in `state_party`. A state counts as migrated once at least one
/// link exists for its reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartyLink {
    pub state_ref: StateRef,
    pub public_key_hash: Vec<u8>,
    pub x500_name: Option<String>,
}

/// Predicate understood by the store's count and page queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFilter {
    /// States without any `state_party` row.
    Undone,
    All,
}
