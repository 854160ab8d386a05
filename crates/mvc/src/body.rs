use crate::error::{DispatchError, HandlerError};
use bytes::Bytes;
use http_body::Body as HttpBody;
use http_body::{Frame, SizeHint};
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use std::fmt::{Debug, Formatter};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Mutex;

/// The boxed body stream a request carries.
pub type BoxReqBody = UnsyncBoxBody<Bytes, HandlerError>;

/// A request body that can be taken exactly once, shared by every holder of the request.
///
/// Forwarded requests share the same handle, so a body consumed before a forward stays consumed.
#[derive(Clone)]
pub struct RequestBody {
    inner: Arc<Mutex<Option<BoxReqBody>>>,
}

impl RequestBody {
    pub fn new<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<HandlerError>,
    {
        Self { inner: Arc::new(Mutex::new(Some(body.map_err(Into::<HandlerError>::into).boxed_unsync()))) }
    }

    pub fn empty() -> Self {
        Self { inner: Arc::new(Mutex::new(None)) }
    }

    pub async fn can_consume(&self) -> bool {
        let guard = self.inner.lock().await;
        guard.is_some()
    }

    /// Takes the body stream, leaving the handle consumed.
    pub async fn take(&self) -> Option<BoxReqBody> {
        let mut guard = self.inner.lock().await;
        guard.take()
    }

    /// Collects the whole body.
    ///
    /// Fails with [`DispatchError::BodyMissing`] if the body was consumed already or is empty.
    pub async fn bytes(&self) -> Result<Bytes, DispatchError> {
        let body = self.take().await.ok_or(DispatchError::BodyMissing)?;
        let bytes = body
            .collect()
            .await
            .map_err(|e| DispatchError::server_internal(format!("read request body error: {e}")))?
            .to_bytes();

        if bytes.is_empty() {
            return Err(DispatchError::BodyMissing);
        }
        Ok(bytes)
    }
}

impl Debug for RequestBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("RequestBody")
    }
}

pub struct ResponseBody {
    inner: Kind,
}

enum Kind {
    Once(Option<Bytes>),
    Stream(UnsyncBoxBody<Bytes, HandlerError>),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { inner: Kind::Once(None) }
    }

    pub fn once(bytes: Bytes) -> Self {
        if bytes.is_empty() { Self::empty() } else { Self { inner: Kind::Once(Some(bytes)) } }
    }

    pub fn stream<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes, Error = HandlerError> + Send + 'static,
    {
        Self { inner: Kind::Stream(UnsyncBoxBody::new(body)) }
    }

    /// The buffered content, `None` for streaming bodies.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.inner {
            Kind::Once(Some(bytes)) => Some(bytes.as_ref()),
            Kind::Once(None) => Some(&[]),
            Kind::Stream(_) => None,
        }
    }
}

impl Debug for ResponseBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Kind::Once(bytes) => f.debug_tuple("ResponseBody::Once").field(bytes).finish(),
            Kind::Stream(_) => f.write_str("ResponseBody::Stream"),
        }
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        Self::once(Bytes::from(value))
    }
}

impl From<Bytes> for ResponseBody {
    fn from(value: Bytes) -> Self {
        Self::once(value)
    }
}

impl From<()> for ResponseBody {
    fn from((): ()) -> Self {
        Self::empty()
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        Self::once(Bytes::from_static(value.as_bytes()))
    }
}

impl HttpBody for ResponseBody {
    type Data = Bytes;
    type Error = HandlerError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let kind = &mut self.get_mut().inner;
        match kind {
            Kind::Once(option_bytes) => Poll::Ready(option_bytes.take().map(|bytes| Ok(Frame::data(bytes)))),
            Kind::Stream(box_body) => {
                let pin = Pin::new(box_body);
                pin.poll_frame(cx)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            Kind::Once(option_bytes) => option_bytes.is_none(),
            Kind::Stream(box_body) => box_body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            Kind::Once(None) => SizeHint::with_exact(0),
            Kind::Once(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            Kind::Stream(box_body) => box_body.size_hint(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use http_body_util::{Full, StreamBody};
    use std::io;

    fn check_send<T: Send>() {}

    #[test]
    fn is_send() {
        check_send::<ResponseBody>();
        check_send::<RequestBody>();
    }

    #[tokio::test]
    async fn test_string_body() {
        let mut body = ResponseBody::from("Hello world".to_string());

        assert_eq!(body.size_hint().exact(), Some(11));
        assert!(!body.is_end_stream());

        let bytes = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert_eq!(bytes, Bytes::from("Hello world"));

        assert!(body.is_end_stream());
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_body() {
        let mut body = ResponseBody::from("");

        assert!(body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(0));
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_body() {
        let chunks: Vec<Result<_, io::Error>> =
            vec![Ok(Frame::data(Bytes::from(vec![1]))), Ok(Frame::data(Bytes::from(vec![2])))];
        let stream = futures::stream::iter(chunks).map_err(|e| Box::new(e) as HandlerError);
        let mut body = ResponseBody::stream(StreamBody::new(stream));

        assert!(body.size_hint().exact().is_none());
        assert!(body.as_bytes().is_none());
        assert_eq!(body.frame().await.unwrap().unwrap().into_data().unwrap().as_ref(), [1]);
        assert_eq!(body.frame().await.unwrap().unwrap().into_data().unwrap().as_ref(), [2]);
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn request_body_is_taken_once() {
        let body = RequestBody::new(Full::<Bytes>::from("payload"));
        let shared = body.clone();

        assert!(body.can_consume().await);
        assert_eq!(body.bytes().await.unwrap(), Bytes::from("payload"));
        assert!(!shared.can_consume().await);
        assert!(matches!(shared.bytes().await, Err(DispatchError::BodyMissing)));
    }

    #[tokio::test]
    async fn empty_request_body_is_missing() {
        let body = RequestBody::new(Full::<Bytes>::default());
        assert!(matches!(body.bytes().await, Err(DispatchError::BodyMissing)));
        assert!(matches!(RequestBody::empty().bytes().await, Err(DispatchError::BodyMissing)));
    }
}
