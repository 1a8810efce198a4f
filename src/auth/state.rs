//! Authentication state trait and macro.

use crate::gateway::AuthGateway;

/// Trait for state types that provide the gateway for authentication.
pub trait HasAuthBackend {
    fn gateway(&self) -> &AuthGateway;
    fn secure_cookies(&self) -> bool;
}

/// Macro to implement `HasAuthBackend` for state structs with the standard fields.
///
/// The struct must have these fields:
/// - `gateway: Arc<AuthGateway>`
/// - `secure_cookies: bool`
///
/// # Example
/// ```ignore
/// use crate::impl_has_auth_backend;
///
/// #[derive(Clone)]
/// pub struct MyState {
///     pub gateway: Arc<AuthGateway>,
///     pub secure_cookies: bool,
///     // ... other fields
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn gateway(&self) -> &$crate::gateway::AuthGateway {
                &self.gateway
            }
            fn secure_cookies(&self) -> bool {
                self.secure_cookies
            }
        }
    };
}
