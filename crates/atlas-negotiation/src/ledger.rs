//! Evidence ledger seam
//!
//! Optional audit sink for decision events. Negotiation never depends on it:
//! the pipeline logs a failed record and carries on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::contracts::NegotiationDecisionEvent;

/// Ledger failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// Receipt for a recorded event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofHandle {
    /// Chained SHA-256 over the previous proof and the event payload
    pub proof_id: String,

    pub event_id: Uuid,

    /// Position in the ledger
    pub sequence: u64,

    pub recorded_at: DateTime<Utc>,
}

/// Record-and-verify audit sink
pub trait EvidenceLedger: Send + Sync {
    fn record_evidence(&self, event: &NegotiationDecisionEvent) -> Result<ProofHandle, LedgerError>;

    /// True iff the handle names an intact entry
    fn verify(&self, proof: &ProofHandle) -> bool;
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    proof_id: String,
    previous: String,
    event_id: Uuid,
    payload: String,
}

fn chain_hash(previous: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous.as_bytes());
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash-chained in-process ledger
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    entries: RwLock<Vec<LedgerEntry>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute the whole chain
    pub fn verify_chain(&self) -> bool {
        let Ok(entries) = self.entries.read() else {
            return false;
        };
        let mut previous = String::new();
        for entry in entries.iter() {
            if entry.previous != previous || chain_hash(&entry.previous, &entry.payload) != entry.proof_id {
                return false;
            }
            previous = entry.proof_id.clone();
        }
        true
    }

    #[cfg(test)]
    fn tamper(&self, sequence: usize, payload: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries[sequence].payload = payload.to_string();
        }
    }
}

impl EvidenceLedger for InMemoryLedger {
    fn record_evidence(&self, event: &NegotiationDecisionEvent) -> Result<ProofHandle, LedgerError> {
        let payload =
            serde_json::to_string(event).map_err(|e| LedgerError::Serialization(e.to_string()))?;

        let mut entries = self
            .entries
            .write()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        let previous = entries.last().map(|e| e.proof_id.clone()).unwrap_or_default();
        let proof_id = chain_hash(&previous, &payload);
        let sequence = entries.len() as u64;

        entries.push(LedgerEntry {
            proof_id: proof_id.clone(),
            previous,
            event_id: event.event_id,
            payload,
        });

        Ok(ProofHandle {
            proof_id,
            event_id: event.event_id,
            sequence,
            recorded_at: Utc::now(),
        })
    }

    fn verify(&self, proof: &ProofHandle) -> bool {
        let Ok(entries) = self.entries.read() else {
            return false;
        };
        entries
            .get(proof.sequence as usize)
            .map(|entry| {
                entry.proof_id == proof.proof_id
                    && entry.event_id == proof.event_id
                    && chain_hash(&entry.previous, &entry.payload) == entry.proof_id
            })
            .unwrap_or(false)
    }
}
