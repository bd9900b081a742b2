use blockchain_db::Error as BlockchainDBError;

/// Type alias for Blockchain operations that may result in an error
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for blockchain operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when a block expected on the main chain is not there
    #[error("Block not found")]
    BlockNotFound,

    /// Returned when a transaction expected on the main chain is not there
    #[error("Transaction not found")]
    TransactionNotFound,

    /// Returned when a block's transaction is neither pooled nor confirmed
    #[error("Transaction is not in the pool")]
    TransactionNotInPool,

    /// Returned when a block spends an already-spent key image
    #[error("Key image already spent")]
    SpentKeyImage,

    /// Returned when a block's coinbase does not follow the emission schedule
    #[error("Coinbase does not follow network emission")]
    InvalidCoinbase,

    /// Returned when a seeded genesis block is not a genesis block
    #[error("Block is not a valid genesis block")]
    InvalidGenesisBlock,

    /// Returned when no block of a peer's short history is on our main chain
    #[error("No common block with the queried chain history")]
    NoCommonBlock,

    /// Returned when the transaction pool seam has not been wired up or has
    /// already been torn down
    #[error("Transaction pool is not available")]
    TxPoolUnavailable,

    /// Returned when a checkpoint conflicts with stored blocks or with an
    /// existing checkpoint
    #[error(transparent)]
    Checkpoints(#[from] common::checkpoints::Error),

    /// Returned when the blockchain DB returns an error
    #[error(transparent)]
    DB(#[from] BlockchainDBError),

    /// Returned on filesystem errors from the print helpers
    #[error(transparent)]
    Io(#[from] std::io::Error)
}
