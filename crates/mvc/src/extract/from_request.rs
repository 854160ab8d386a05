use crate::error::DispatchError;
use crate::request::Request;
use async_trait::async_trait;

/// Builds a handler argument from the request.
///
/// Extraction failures are reported as [`DispatchError`]s, so the exception resolver can
/// answer with the matching status.
#[async_trait]
pub trait FromRequest: Sized + Send {
    async fn from_request(req: &Request) -> Result<Self, DispatchError>;
}

/// An optional argument never fails, a failing extraction yields `None`.
#[async_trait]
impl<T> FromRequest for Option<T>
where
    T: FromRequest,
{
    async fn from_request(req: &Request) -> Result<Self, DispatchError> {
        Ok(T::from_request(req).await.ok())
    }
}

/// Hands the extraction outcome to the handler instead of failing the request.
#[async_trait]
impl<T> FromRequest for Result<T, DispatchError>
where
    T: FromRequest,
{
    async fn from_request(req: &Request) -> Result<Self, DispatchError> {
        Ok(T::from_request(req).await)
    }
}

#[async_trait]
impl FromRequest for () {
    async fn from_request(_req: &Request) -> Result<Self, DispatchError> {
        Ok(())
    }
}
