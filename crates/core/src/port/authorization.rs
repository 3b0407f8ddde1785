// Authorization Provider Port

use crate::domain::{RequestContext, User};

/// Resolves the caller behind a request.
///
/// `None` means anonymous: no identity and no elevated access.
pub trait AuthorizationProvider: Send + Sync {
    fn user(&self, ctx: &RequestContext) -> Option<User>;
}

/// Uses the identity the API layer already attached to the context
pub struct ContextAuthorization;

impl AuthorizationProvider for ContextAuthorization {
    fn user(&self, ctx: &RequestContext) -> Option<User> {
        ctx.user.clone()
    }
}
