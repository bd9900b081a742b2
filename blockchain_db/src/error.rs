/// Type alias for BlockchainDB operations that may result in an error
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for BlockchainDB operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when a requested entry is not in the database
    #[error("Entry does not exist: {0}")]
    DoesNotExist(String),

    /// Returned when an added entry is already in the database
    #[error("Entry already exists: {0}")]
    Exists(String),

    /// Returned when an entry or a request is malformed
    #[error("Invalid entry: {0}")]
    Invalid(String),

    /// Returned when the database could not be opened
    #[error("Error opening database: {0}")]
    DBOpenError(String),

    /// Returned by the underlying key-value store
    #[error("{0}")]
    Store(rkv::StoreError),

    /// Returned when an entry cannot be encoded or decoded
    #[error(transparent)]
    Serialization(#[from] bincode::Error),

    /// Returned on filesystem errors
    #[error(transparent)]
    Io(#[from] std::io::Error)
}

impl From<rkv::StoreError> for Error {
    fn from(e: rkv::StoreError) -> Error {
        Error::Store(e)
    }
}
