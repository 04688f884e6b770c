//! # Persistence
//!
//! Models are stored as pretty-printed JSON tagged with a type string:
//!
//! ```text
//! {
//!   "type": "statebrain.Block",
//!   "start": [...],
//!   "outputs": [[...], ...],
//!   "transitions": [[[...], ...], ...]
//! }
//! ```
//!
//! [`deserialize_block`] reads the tag and picks the constructor; there is no
//! global registry. Restored variables get fresh parameter ids.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::error::{Result, StatebrainError};

/// Type tag written for [`Block`]
pub const BLOCK_TYPE: &str = "statebrain.Block";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum PersistedModel {
    #[serde(rename = "statebrain.Block")]
    Block(BlockRecord),
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockRecord {
    start: Vec<f64>,
    outputs: Vec<Vec<f64>>,
    transitions: Vec<Vec<Vec<f64>>>,
}

#[derive(Deserialize)]
struct TypeHeader {
    #[serde(rename = "type")]
    kind: String,
}

impl Block {
    /// Type tag stored alongside the parameters
    pub fn serializer_type(&self) -> &'static str {
        BLOCK_TYPE
    }

    /// Encode every parameter tensor as tagged JSON
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let record = BlockRecord {
            start: self.start.vector.clone(),
            outputs: self.entries.iter().map(|e| e.output.vector.clone()).collect(),
            transitions: self
                .entries
                .iter()
                .map(|e| e.transitions.iter().map(|t| t.vector.clone()).collect())
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&PersistedModel::Block(record))?;
        Ok(bytes)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.serialize()?)?;
        tracing::debug!(path = %path.display(), "saved block");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let block = deserialize_block(&data)?;
        tracing::debug!(
            path = %path.display(),
            alphabet_size = block.alphabet_size(),
            state_count = block.state_count(),
            "loaded block"
        );
        Ok(block)
    }
}

/// Decode a model written by [`Block::serialize`].
///
/// Malformed JSON, an unknown type tag and inconsistent tensor shapes are all
/// reported; no partially built block is ever returned.
pub fn deserialize_block(data: &[u8]) -> Result<Block> {
    let header: TypeHeader = serde_json::from_slice(data)?;
    if header.kind != BLOCK_TYPE {
        return Err(StatebrainError::UnknownModelType(header.kind));
    }

    let PersistedModel::Block(record) = serde_json::from_slice(data)?;
    Block::from_logits(record.start, record.outputs, record.transitions)
        .map_err(|e| StatebrainError::Decode(e.to_string()))
}
