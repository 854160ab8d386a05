//! URL extraction: query strings, parameters and path variables.
//!
//! `Query<T>` deserializes the raw query string with `serde_qs`, which understands nested
//! keys such as `user[name]=x`.
//!
//! # Example
//! ```no_run
//! # use serde::Deserialize;
//! # use micro_mvc::extract::Query;
//!
//! #[derive(Deserialize)]
//! struct Params {
//!     name: String,
//!     age: u32,
//! }
//!
//! async fn handler(Query(params): Query<Params>) -> String {
//!     format!("Name: {}, Age: {}", params.name, params.age)
//! }
//! ```

use crate::error::DispatchError;
use crate::extract::{FromRequest, Query};
use crate::params::ParamMap;
use crate::request::{PathVariables, Request};
use async_trait::async_trait;
use http::StatusCode;
use serde::de::DeserializeOwned;

#[async_trait]
impl<T> FromRequest for Query<T>
where
    T: DeserializeOwned + Send,
{
    async fn from_request(req: &Request) -> Result<Self, DispatchError> {
        let query = req.uri().query().unwrap_or_default();
        serde_qs::from_str::<T>(query)
            .map(Query)
            .map_err(|e| DispatchError::status(StatusCode::BAD_REQUEST, format!("invalid query string: {e}")))
    }
}

#[async_trait]
impl FromRequest for ParamMap {
    async fn from_request(req: &Request) -> Result<Self, DispatchError> {
        Ok(req.params().clone())
    }
}

#[async_trait]
impl FromRequest for PathVariables {
    async fn from_request(req: &Request) -> Result<Self, DispatchError> {
        Ok(req.path_variables().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::RequestBody;
    use serde::Deserialize;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Page {
        page: u32,
        size: Option<u32>,
    }

    fn request(uri: &str) -> Request {
        let (parts, ()) = http::Request::builder().uri(uri).body(()).unwrap().into_parts();
        Request::new(parts, RequestBody::empty())
    }

    #[tokio::test]
    async fn query_is_deserialized() {
        let Query(page) = Query::<Page>::from_request(&request("/list?page=3")).await.unwrap();
        assert_eq!(page, Page { page: 3, size: None });
    }

    #[tokio::test]
    async fn invalid_query_is_bad_request() {
        let error = Query::<Page>::from_request(&request("/list?page=abc")).await.err().unwrap();
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);

        let error = Query::<Page>::from_request(&request("/list")).await.err().unwrap();
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn optional_extraction_swallows_failure() {
        let page = Option::<Query<Page>>::from_request(&request("/list")).await.unwrap();
        assert!(page.is_none());
    }
}
