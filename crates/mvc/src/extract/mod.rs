//! Handler argument extraction.
//!
//! Every argument of a function handler implements [`FromRequest`]. Besides the wrappers
//! declared here, arguments may be [`http::Method`], [`http::Uri`], [`http::HeaderMap`],
//! [`crate::ParamMap`], [`crate::PathVariables`], [`bytes::Bytes`], [`String`],
//! [`crate::session::Session`], `()`, and `Option<T>` / `Result<T, DispatchError>` of any of them.

mod extract_body;
mod extract_header;
mod extract_tuple;
mod extract_url;
mod from_request;

pub use from_request::FromRequest;

use crate::multipart::MultipartRequest;
use std::ops::Deref;
use std::sync::Arc;

/// Represented as form data
///
/// when `post` as a `application/x-www-form-urlencoded`, we can using this struct to inject data,
/// note: the struct must impl [`serde::de::DeserializeOwned`] and [`Send`]
///
/// # Example
/// ```
/// # use serde::Deserialize;
/// # use micro_mvc::extract::Form;
/// # #[allow(dead_code)]
/// #[derive(Deserialize, Debug)]
/// struct Params {
///     name: String,
///     zip: String,
/// }
///
/// pub async fn handle(Form(params) : Form<Params>) -> String {
///     format!("received params: {:?}", params)
/// }
/// ```
pub struct Form<T>(pub T);

/// Represented as json data
///
/// As an argument it reads an `application/json` body; as a return value it is handed to the
/// configured message converter.
///
/// # Example
/// ```
/// # use serde::{Deserialize, Serialize};
/// # use micro_mvc::extract::Json;
/// # #[allow(dead_code)]
/// #[derive(Deserialize, Serialize, Debug)]
/// struct User {
///     name: String,
///     zip: String,
/// }
///
/// pub async fn handle(Json(user) : Json<User>) -> Json<User> {
///     Json(user)
/// }
/// ```
pub struct Json<T>(pub T);

/// Represented as url query data
///
/// when request with url query, we can using this struct to inject data,
/// note: the struct must impl [`serde::de::DeserializeOwned`] and [`Send`]
pub struct Query<T>(pub T);

/// The resolved `multipart/form-data` content of the current request.
#[derive(Debug, Clone)]
pub struct Multipart(pub Arc<MultipartRequest>);

impl Deref for Multipart {
    type Target = MultipartRequest;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
