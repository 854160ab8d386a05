use crate::error::DispatchError;
use crate::extract::from_request::FromRequest;
use crate::request::Request;
use async_trait::async_trait;
use http::{HeaderMap, Method, Uri};

#[async_trait]
impl FromRequest for Method {
    async fn from_request(req: &Request) -> Result<Self, DispatchError> {
        Ok(req.method().clone())
    }
}

#[async_trait]
impl FromRequest for Uri {
    async fn from_request(req: &Request) -> Result<Self, DispatchError> {
        Ok(req.uri().clone())
    }
}

#[async_trait]
impl FromRequest for HeaderMap {
    async fn from_request(req: &Request) -> Result<Self, DispatchError> {
        Ok(req.headers().clone())
    }
}
