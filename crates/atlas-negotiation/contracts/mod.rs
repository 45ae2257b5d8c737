//! Negotiation contracts
//!
//! Data model shared by the extraction tracks, the negotiator and the
//! promotion quorum.

mod decision_event;
mod evidence;
mod negotiation;
mod schema;

pub use decision_event::*;
pub use evidence::*;
pub use negotiation::*;
pub use schema::*;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Input for one document-processing request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRequest {
    /// Unique request identifier
    pub request_id: Uuid,

    /// Natural-language extraction request
    pub query: String,

    /// Page URL, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_hint: Option<String>,

    /// Requester identity
    pub requested_by: String,
}

impl ExtractionRequest {
    pub fn new(query: impl Into<String>, requested_by: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            query: query.into(),
            url_hint: None,
            requested_by: requested_by.into(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url_hint = Some(url.into());
        self
    }
}
