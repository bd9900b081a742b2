/// Outcome record of a transaction admission attempt
///
/// Filled in by the admission pipeline and the transaction pool. The three
/// verification flags are orthogonal: a transaction can be undecidable
/// without being invalid, and a duplicate is neither.
#[derive(Clone, Copy, Debug, Default)]
pub struct TxVerificationContext {
    /// The transaction is malformed or invalid and the sender may be sanctioned
    pub verification_failed: bool,
    /// The transaction cannot be decided right now (e.g. it references
    /// outputs this node does not know about yet)
    pub verification_impossible: bool,
    /// The transaction was accepted into the pool
    pub added_to_pool: bool,
    /// The transaction should be announced to peers
    pub should_be_relayed: bool
}

/// Outcome record of a block admission attempt
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockVerificationContext {
    /// The block extended the main chain
    pub added_to_main_chain: bool,
    /// The block failed verification and the sender may be sanctioned
    pub verification_failed: bool,
    /// The block was stored on an alternative chain
    pub marked_as_orphaned: bool,
    /// The block is already known (main or alternative chain)
    pub already_exists: bool
}
