//! Response shapes for the HTTP surface.
//!
//! Pure mapping from domain results to JSON; no reconciliation logic here.

use serde::{Deserialize, Serialize};

use crate::domain::{
    AttemptOutcome, InspectionEntry, InspectionStatus, PassResult, Resolution,
};

/// One entry of `{ results: [...] }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeResponse {
    pub position_id: u64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&AttemptOutcome> for OutcomeResponse {
    fn from(outcome: &AttemptOutcome) -> Self {
        let mut response = Self {
            position_id: outcome.position_id,
            status: outcome.status().to_string(),
            tx_hash: None,
            error: None,
            reason: None,
        };

        match &outcome.resolution {
            Resolution::Closed { tx_hash } => response.tx_hash = Some(tx_hash.to_string()),
            Resolution::Failed { error } => response.error = Some(error.clone()),
            Resolution::Skipped { reason } => response.reason = Some(reason.clone()),
        }

        response
    }
}

/// Body of a completed pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassResponse {
    pub results: Vec<OutcomeResponse>,
}

impl From<&PassResult> for PassResponse {
    fn from(result: &PassResult) -> Self {
        Self {
            results: result.outcomes().iter().map(OutcomeResponse::from).collect(),
        }
    }
}

/// One entry of `{ debug: [...] }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionResponse {
    pub position_id: u64,
    pub index: u64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&InspectionEntry> for InspectionResponse {
    fn from(entry: &InspectionEntry) -> Self {
        let (status, proof_length, reason) = match &entry.status {
            InspectionStatus::Valid { proof_length } => ("valid", Some(*proof_length), None),
            InspectionStatus::Invalid { reason } => ("invalid", None, Some(reason.clone())),
        };

        Self {
            position_id: entry.position_id,
            index: entry.asset_index,
            status: status.to_string(),
            proof_length,
            reason,
        }
    }
}

/// Body of the debug endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionReport {
    pub debug: Vec<InspectionResponse>,
}
