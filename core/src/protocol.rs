use log::debug;
use serde::{Deserialize, Serialize};

/// Opaque description of the peer connection a relay should skip
///
/// The default value excludes nobody and is used for locally originated
/// blocks.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConnectionContext {
    /// Identifier of the connection, 0 when none
    pub peer_id: u64
}

/// Announcement of a freshly accepted block
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NotifyNewBlock {
    /// Serialized block
    pub block: Vec<u8>,
    /// Serialized transactions confirmed by the block
    pub txs: Vec<Vec<u8>>,
    /// Our blockchain height after accepting the block
    pub current_blockchain_height: u64,
    /// Number of relay hops this block has travelled (0 when mined locally)
    pub hop: u32
}

/// The relay capability the core consumes from the peer protocol layer
pub trait CryptonoteProtocol: Send + Sync {
    /// Announces a block to all peers except the excluded connection
    fn relay_block(&self, notification: &NotifyNewBlock, exclude_context: &ConnectionContext);
}

/// No-op protocol used whenever no real protocol is attached, so dispatch
/// sites never branch on "is a protocol present"
pub(crate) struct ProtocolStub;

impl CryptonoteProtocol for ProtocolStub {
    fn relay_block(&self, _: &NotifyNewBlock, _: &ConnectionContext) {
        debug!("No protocol attached, dropping block relay");
    }
}
