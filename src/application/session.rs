//! Session identity supplied by the host application.

use async_trait::async_trait;
use axum::http::HeaderMap;
use visitor_types::Session;

use super::error::AppError;

/// Authentication guard a request's identity is resolved with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Guard {
    /// The resolver's default guard.
    #[default]
    Default,
    Named(String),
    /// Never resolve an identity. Flash data is still forwarded.
    Disabled,
}

impl Guard {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

/// Looks up the session of the current request.
///
/// Authentication itself is out of scope: implementations adapt whatever the host
/// framework knows about the caller into a [`Session`].
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap, guard: &Guard) -> Result<Session, AppError>;
}

/// Resolver for applications without authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousSessions;

#[async_trait]
impl SessionResolver for AnonymousSessions {
    async fn resolve(&self, _headers: &HeaderMap, _guard: &Guard) -> Result<Session, AppError> {
        Ok(Session::anonymous())
    }
}

/// Resolve the envelope session, honouring [`Guard::Disabled`].
pub(crate) async fn resolve_session(
    resolver: &dyn SessionResolver,
    headers: &HeaderMap,
    guard: &Guard,
) -> Result<Session, AppError> {
    let session = resolver.resolve(headers, guard).await?;
    if *guard == Guard::Disabled {
        return Ok(Session::anonymous().with_flash(session.flash));
    }
    Ok(session)
}
