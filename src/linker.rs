//! Reference transform: populate `state_party` from each state's participants.
//!
//! A contract payload is stored as JSON with a `participants` list. Every
//! participant becomes one link keyed by the SHA-256 of its owning key, and a
//! state becomes relevant when one of the node's own keys takes part in it.

use crate::error::RecordError;
use crate::migration::Transform;
use crate::models::{PartyLink, Relevancy, VaultRecord};
use crate::store::Transaction;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

#[derive(Debug, Deserialize)]
struct ContractPayload {
    #[serde(default)]
    participants: Vec<Participant>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(default)]
    pub name: Option<String>,
    pub owning_key: String,
}

/// Decoder for contract payloads of known classes. Built once per run.
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    classes: HashSet<String>,
}

impl ContractRegistry {
    pub fn new(classes: impl IntoIterator<Item = String>) -> Self {
        Self {
            classes: classes.into_iter().collect(),
        }
    }

    pub fn knows(&self, class_name: &str) -> bool {
        self.classes.contains(class_name)
    }

    /// Participants of `record`'s contract state.
    ///
    /// An unregistered class cannot be decoded at all and is unrecoverable. A
    /// payload that does not parse is skipped so it can be retried later.
    pub fn decode(&self, record: &VaultRecord) -> Result<Vec<Participant>, RecordError> {
        if !self.knows(&record.contract_state_class_name) {
            return Err(RecordError::unrecoverable(format!(
                "no decoder registered for contract class {}",
                record.contract_state_class_name
            )));
        }

        let payload: ContractPayload = serde_json::from_slice(&record.contract_state)
            .map_err(|err| RecordError::skip(format!("undecodable contract state: {}", err)))?;
        Ok(payload.participants)
    }
}

pub fn key_hash(owning_key: &str) -> Vec<u8> {
    Sha256::digest(owning_key.as_bytes()).to_vec()
}

/// Links every state to its participants and recomputes relevancy.
pub struct PartyLinker {
    contract_classes: Vec<String>,
    our_keys: HashSet<String>,
}

impl PartyLinker {
    pub fn new(
        contract_classes: impl IntoIterator<Item = String>,
        our_keys: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            contract_classes: contract_classes.into_iter().collect(),
            our_keys: our_keys.into_iter().collect(),
        }
    }

    fn relevancy_for(&self, participants: &[Participant]) -> Relevancy {
        if participants
            .iter()
            .any(|participant| self.our_keys.contains(&participant.owning_key))
        {
            Relevancy::Relevant
        } else {
            Relevancy::NotRelevant
        }
    }
}

impl Transform for PartyLinker {
    type Context = ContractRegistry;

    fn establish_context(&self) -> Result<ContractRegistry, RecordError> {
        if self.contract_classes.is_empty() {
            return Err(RecordError::unrecoverable(
                "no contract classes registered for decoding",
            ));
        }
        log::debug!(
            "contract registry ready with {} classes",
            self.contract_classes.len()
        );
        Ok(ContractRegistry::new(self.contract_classes.iter().cloned()))
    }

    fn apply(
        &self,
        registry: &ContractRegistry,
        tx: &mut dyn Transaction,
        record: &VaultRecord,
    ) -> Result<(), RecordError> {
        if tx.is_done(&record.state_ref)? {
            return Ok(());
        }

        let participants = registry.decode(record)?;
        if participants.is_empty() {
            return Err(RecordError::skip("contract state has no participants"));
        }

        for participant in &participants {
            tx.mark_done(&PartyLink {
                state_ref: record.state_ref.clone(),
                public_key_hash: key_hash(&participant.owning_key),
                x500_name: participant.name.clone(),
            })?;
        }

        let relevancy = self.relevancy_for(&participants);
        if relevancy != record.relevancy_status {
            tx.set_relevancy(&record.state_ref, relevancy)?;
        }
        Ok(())
    }
}
