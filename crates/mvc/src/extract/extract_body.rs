use crate::error::DispatchError;
use crate::extract::{Form, FromRequest, Json, Multipart};
use crate::request::Request;
use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;

#[async_trait]
impl FromRequest for Bytes {
    async fn from_request(req: &Request) -> Result<Self, DispatchError> {
        req.body().bytes().await
    }
}

#[async_trait]
impl FromRequest for String {
    async fn from_request(req: &Request) -> Result<Self, DispatchError> {
        let bytes = Bytes::from_request(req).await?;
        String::from_utf8(bytes.into())
            .map_err(|_| DispatchError::status(StatusCode::BAD_REQUEST, "request body is not utf8"))
    }
}

#[async_trait]
impl<T> FromRequest for Form<T>
where
    T: DeserializeOwned + Send,
{
    async fn from_request(req: &Request) -> Result<Self, DispatchError> {
        let bytes = Bytes::from_request(req).await?;
        serde_urlencoded::from_bytes::<T>(&bytes)
            .map(Form)
            .map_err(|e| DispatchError::status(StatusCode::BAD_REQUEST, format!("invalid form body: {e}")))
    }
}

#[async_trait]
impl<T> FromRequest for Json<T>
where
    T: DeserializeOwned + Send,
{
    async fn from_request(req: &Request) -> Result<Self, DispatchError> {
        let bytes = Bytes::from_request(req).await?;
        serde_json::from_slice::<T>(&bytes)
            .map(Json)
            .map_err(|e| DispatchError::status(StatusCode::BAD_REQUEST, format!("invalid json body: {e}")))
    }
}

#[async_trait]
impl FromRequest for Multipart {
    async fn from_request(req: &Request) -> Result<Self, DispatchError> {
        req.multipart().cloned().map(Multipart).ok_or_else(|| DispatchError::multipart("current request is not a multipart request"))
    }
}
