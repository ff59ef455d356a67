//! Connection identity: who is on the other end of a socket.
//!
//! Authentication is performed by an external collaborator; by the time a
//! connection reaches the classroom server its user id is taken as given.
//! The optional bearer token is forwarded verbatim on every directory call
//! made on the user's behalf.

/// Identity a connection was admitted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User id issued by the authentication collaborator.
    pub user_id: crate::UserId,
    /// Bearer token to forward to the classroom directory, if any.
    pub token: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<crate::UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}
