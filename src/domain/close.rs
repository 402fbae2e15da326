//! Close requests as recorded by the trading contract.

use serde::{Deserialize, Serialize};

/// Position id the contract uses for an unassigned slot.
pub const UNASSIGNED_POSITION_ID: u64 = 0;

/// A pending request to close a trading position.
///
/// Produced by ledger discovery and never modified afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseRequest {
    /// On-chain position identifier
    pub position_id: u64,
    /// Index of the priced instrument the proof is computed for
    pub asset_index: u64,
}

impl CloseRequest {
    pub fn new(position_id: u64, asset_index: u64) -> Self {
        Self {
            position_id,
            asset_index,
        }
    }

    /// Whether this request carries an id that may be submitted on-chain.
    pub fn has_assigned_id(&self) -> bool {
        self.position_id != UNASSIGNED_POSITION_ID
    }
}
