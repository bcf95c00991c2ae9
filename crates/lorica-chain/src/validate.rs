//! Head-relative chain validation.
//!
//! Classification of an incoming entry against the local head:
//! genesis anchoring at index 0, extension when the entry directly follows
//! the head, duplicate for anything at or below the head, gap when the
//! entry skips ahead. A broken prev-hash link is an error, not a
//! classification.

use serde::{Deserialize, Serialize};

use crate::entry::GENESIS_HASH;
use crate::{ChainError, Result};

/// The local chain head.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadRef {
    pub index: u64,
    pub hash: String,
}

/// Where an incoming entry falls relative to the local head.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// A valid index-0 entry on an empty chain.
    Genesis,
    /// Directly extends the local head.
    Extension,
    /// At or below the local head; already applied.
    Duplicate,
}

/// Classify an entry against the local head.
///
/// Returns [`ChainError::GapDetected`] when the entry skips ahead (the
/// caller converts this into a backfill sync), [`ChainError::ChainBroken`]
/// on a prev-hash mismatch, and [`ChainError::InvalidGenesis`] for an
/// index-0 entry not anchored to the all-zero hash.
pub fn classify(head: Option<&HeadRef>, index: u64, prev_hash: &str) -> Result<Disposition> {
    match head {
        None => {
            if index == 0 {
                if prev_hash != GENESIS_HASH {
                    return Err(ChainError::InvalidGenesis {
                        got: prev_hash.to_string(),
                    });
                }
                Ok(Disposition::Genesis)
            } else {
                Err(ChainError::GapDetected {
                    local_head: -1,
                    incoming: index,
                })
            }
        }
        Some(head) => {
            if index <= head.index {
                Ok(Disposition::Duplicate)
            } else if index == head.index + 1 {
                if prev_hash != head.hash {
                    return Err(ChainError::ChainBroken {
                        expected: head.hash.clone(),
                        got: prev_hash.to_string(),
                    });
                }
                Ok(Disposition::Extension)
            } else {
                Err(ChainError::GapDetected {
                    local_head: head.index as i64,
                    incoming: index,
                })
            }
        }
    }
}

/// Detect a conflict between a locally built, unsubmitted entry and a
/// server entry occupying the same index with a different hash.
pub fn check_conflict(
    pending_index: u64,
    pending_hash: &str,
    server_index: u64,
    server_hash: &str,
) -> Result<()> {
    if pending_index == server_index && pending_hash != server_hash {
        return Err(ChainError::ConflictDetected {
            index: server_index,
        });
    }
    Ok(())
}
