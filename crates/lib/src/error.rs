use crate::api::ApiError;
use crate::connection::SendError;
use crate::store::StoreError;

/// Failure of a startup step or a user action.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("message not sent: {0}")]
    Send(#[from] SendError),
    #[error("no active conversation")]
    NoActiveConversation,
    #[error("conversation {0} is not loaded")]
    UnknownConversation(String),
}
