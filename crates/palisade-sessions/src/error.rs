use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another request is already in flight for this conversation.
    #[error("conversation busy: {id}")]
    Busy { id: String },

    #[error("conversation not found: {id}")]
    NotFound { id: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
