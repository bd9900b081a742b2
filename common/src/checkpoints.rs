use std::collections::HashMap;
use std::convert::TryFrom;
use std::path::Path;

use log::{debug, info, warn};
use serde::Deserialize;

use crypto::Hash256;
use cryptonote_config::Network;

use crate::genesis;
use crate::GetHash;

/// Type alias for checkpoint operations that may result in an error
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for checkpoint operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when a checkpoint is added for a height that already has a
    /// different hash
    #[error("Conflicting checkpoint at height {height}")]
    Conflict {
        /// Height of the conflicting entry
        height: u64
    },

    /// Returned when the hashfile cannot be read
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Returned when the hashfile is not valid JSON or contains malformed hashes
    #[error("Malformed checkpoint hashfile: {0}")]
    Malformed(String)
}

#[derive(Deserialize)]
struct HashFile {
    hashlines: Vec<HashLine>
}

#[derive(Deserialize)]
struct HashLine {
    height: u64,
    hash: String
}

/// A set of (height, block id) pairs the main chain must honor
#[derive(Clone, Debug, Default)]
pub struct Checkpoints {
    points: HashMap<u64, Hash256>
}

impl Checkpoints {
    /// Creates an empty checkpoint set
    pub fn new() -> Checkpoints {
        Checkpoints::default()
    }

    /// Creates the built-in checkpoint set of the given network
    ///
    /// Currently pins the genesis block. Heights learned later (hashfile or
    /// DNS channel) are merged on top of this set
    pub fn for_network(network: Network) -> Checkpoints {
        let mut checkpoints = Checkpoints::new();
        checkpoints
            .add_checkpoint(0, genesis::generate_genesis_block(network).get_hash())
            .unwrap();
        checkpoints
    }

    /// Adds a checkpoint, rejecting a conflicting re-definition of a height
    pub fn add_checkpoint(&mut self, height: u64, hash: Hash256) -> Result<()> {
        if let Some(existing) = self.points.get(&height) {
            if *existing != hash {
                return Err(Error::Conflict { height });
            }
        }
        self.points.insert(height, hash);
        Ok(())
    }

    /// Returns true if the given height is at or below the highest checkpoint
    pub fn is_in_checkpoint_zone(&self, height: u64) -> bool {
        self.top_checkpoint_height()
            .map(|top| height <= top)
            .unwrap_or(false)
    }

    /// Returns the height of the highest checkpoint, if any
    pub fn top_checkpoint_height(&self) -> Option<u64> {
        self.points.keys().copied().max()
    }

    /// Number of checkpoints in the set
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the set holds no checkpoints
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterates over all (height, hash) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&u64, &Hash256)> {
        self.points.iter()
    }

    /// Checks a block id against the checkpoint at its height
    ///
    /// Returns `Ok(true)` on a checkpoint match, `Ok(false)` if the height has
    /// no checkpoint, and an error on a mismatch
    pub fn check_block(&self, height: u64, hash: &Hash256) -> Result<bool> {
        match self.points.get(&height) {
            None => Ok(false),
            Some(expected) if expected == hash => {
                debug!("Checkpoint passed for height {} {}", height, hash);
                Ok(true)
            }
            Some(expected) => {
                warn!(
                    "Checkpoint failed for height {}. Expected {}, got {}",
                    height, expected, hash
                );
                Err(Error::Conflict { height })
            }
        }
    }

    /// Merges checkpoints from a JSON hashfile
    ///
    /// Returns the number of checkpoints added. A missing file is not an
    /// error; a malformed file or a conflicting entry is
    pub fn load_from_json(&mut self, path: &Path) -> Result<usize> {
        if !path.exists() {
            debug!("No checkpoint hashfile at {}", path.display());
            return Ok(0);
        }

        let contents = std::fs::read_to_string(path)?;
        let hashfile: HashFile = serde_json::from_str(&contents)
            .map_err(|err| Error::Malformed(err.to_string()))?;

        let mut added = 0;
        for line in hashfile.hashlines {
            let hash = Hash256::try_from(line.hash.as_str())
                .map_err(|err| Error::Malformed(err.to_string()))?;
            if self.points.get(&line.height) != Some(&hash) {
                added += 1;
            }
            self.add_checkpoint(line.height, hash)?;
        }
        if added > 0 {
            info!("Loaded {} new checkpoints from {}", added, path.display());
        }
        Ok(added)
    }
}
