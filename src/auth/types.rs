//! Authentication user types.

use crate::db::UserRole;
use crate::jwt::AccessClaims;

/// Authenticated user information extracted from the access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Claims of the access token in force for this request
    /// (the freshly minted one if the request was rotated)
    pub claims: AccessClaims,
    /// Whether a new access token was minted for this request
    pub rotated: bool,
}

impl AuthenticatedUser {
    pub fn uuid(&self) -> &str {
        &self.claims.sub
    }

    pub fn is_admin(&self) -> bool {
        self.claims.role == UserRole::Admin
    }
}
