use crate::error::HandlerError;
use crate::extract::FromRequest;
use crate::fn_trait::FnTrait;
use crate::request::Request;
use crate::view::{IntoView, View};
use async_trait::async_trait;
use std::marker::PhantomData;

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn invoke(&self, req: &Request) -> Result<View, HandlerError>;
}

/// a `FnTrait` holder which represents any async Fn
pub struct FnHandler<F, Args> {
    f: F,
    _phantom: PhantomData<fn(Args)>,
}

impl<F, Args> FnHandler<F, Args>
where
    F: FnTrait<Args>,
{
    fn new(f: F) -> Self {
        Self { f, _phantom: PhantomData }
    }
}

/// Wraps an async function whose arguments all implement [`FromRequest`] into a [`RequestHandler`].
pub fn handler_fn<F, Args>(f: F) -> FnHandler<F, Args>
where
    F: FnTrait<Args>,
{
    FnHandler::new(f)
}

#[async_trait]
impl<F, Args> RequestHandler for FnHandler<F, Args>
where
    F: FnTrait<Args>,
    F::Output: IntoView,
    Args: FromRequest,
{
    async fn invoke(&self, req: &Request) -> Result<View, HandlerError> {
        let args = Args::from_request(req).await?;
        self.f.call(args).await.into_view()
    }
}
