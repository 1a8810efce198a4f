//! Cookie-carried authentication for the HTTP layer.
//!
//! Access and refresh tokens travel in `HttpOnly` cookies; the CSRF secret
//! embedded in the access token is echoed back by the client in the
//! `X-CSRF-Token` header. Expired access tokens are rotated transparently by
//! the extractor and the response middleware writes the new cookies.

mod cookie;
mod errors;
mod extractors;
mod state;
mod types;

pub use cookie::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, clear_cookie, get_cookie, token_cookie};
pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::{ApiAuth, IssuedCredentials, add_issued_credentials, take_issued_credentials};
pub use state::HasAuthBackend;
pub use types::AuthenticatedUser;
