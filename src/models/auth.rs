//! Caller identity models

/// Caller identity supplied by the upstream auth layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthInfo {
    /// Owning user id, also the key of the outbound rate limiter
    pub user_id: String,
}

impl AuthInfo {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}
