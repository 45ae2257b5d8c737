//! Evidence-First Schema Negotiation Engine
//!
//! Turns a natural-language extraction request into a typed field contract,
//! extracts evidence for it along two independent tracks and negotiates the
//! final schema against what the page actually shows.
//!
//! # Tracks
//! - Track A: deterministic selector, metadata, keyword and pattern strategies
//! - Track B: optional model augmentation, every claim anchored to the DOM
//!
//! # Design Principles
//! - Evidence first: no field survives without DOM evidence
//! - Required fields are never silently dropped
//! - Promotion needs K distinct entities AND M distinct blocks
//! - Contracts are immutable; negotiation builds a new schema

pub mod augmenter;
pub mod config;
pub mod document;
pub mod error;
pub mod extractor;
pub mod generator;
pub mod ledger;
pub mod negotiator;
pub mod pipeline;
pub mod quorum;

// Re-export contracts
#[path = "../contracts/mod.rs"]
pub mod contracts;

pub use contracts::*;

pub use augmenter::{
    AugmentationClient, AugmentationError, AugmentationSource, LlmAugmentationResult, LlmAugmenter,
    ResilienceGuard,
};
pub use config::NegotiationConfig;
pub use document::{DocumentSnapshot, DomDocument, SnapshotNode};
pub use error::{NegotiationError, Result};
pub use extractor::DeterministicExtractor;
pub use generator::SchemaContractGenerator;
pub use ledger::{EvidenceLedger, InMemoryLedger, ProofHandle};
pub use negotiator::EvidenceNegotiator;
pub use pipeline::{ExtractionPipeline, PipelineOutcome};
pub use quorum::PromotionQuorumManager;
