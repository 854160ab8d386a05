use std::future::Future;

/// Represents an async function that can be called with its arguments packed into a tuple.
///
/// The returned future must be `Send`, handlers are invoked from the dispatcher's `Send` futures.
pub trait FnTrait<Args>: Send + Sync {
    type Output;
    type Fut: Future<Output = Self::Output> + Send;

    fn call(&self, args: Args) -> Self::Fut;
}

/// impl `Fn` for `FnTrait`, From 0 parameters to 12 parameters
///
/// for example, it will impl Fn(A, B) like this:
///```no_run
/// # use std::future::Future;
/// # use micro_mvc::FnTrait;
/// # struct Wrapper<F>(F);
/// impl<Func, Fut, A, B> FnTrait<(A, B)> for Wrapper<Func>
///    where
///        Func: Fn(A, B) -> Fut + Send + Sync,
///        Fut: Future + Send,
/// {
///    type Output = Fut::Output;
///    type Fut = Fut;
///
///    #[allow(non_snake_case)]
///    fn call(&self, (A, B): (A, B)) -> Self::Fut {
///        (self.0)(A, B)
///    }
/// }
///```
macro_rules! impl_fn_trait_for_fn ({ $($param:ident)* } => {
    impl<Func, Fut, $($param,)*> FnTrait<($($param,)*)> for Func
    where
        Func: Fn($($param),*) -> Fut + Send + Sync,
        Fut: Future + Send,
    {
        type Output = Fut::Output;
        type Fut = Fut;

        #[inline]
        #[allow(non_snake_case)]
        fn call(&self, ($($param,)*): ($($param,)*)) -> Self::Fut {
            (self)($($param,)*)
        }
    }
});

impl_fn_trait_for_fn! {}
impl_fn_trait_for_fn! { A }
impl_fn_trait_for_fn! { A B }
impl_fn_trait_for_fn! { A B C }
impl_fn_trait_for_fn! { A B C D }
impl_fn_trait_for_fn! { A B C D E }
impl_fn_trait_for_fn! { A B C D E F }
impl_fn_trait_for_fn! { A B C D E F G }
impl_fn_trait_for_fn! { A B C D E F G H }
impl_fn_trait_for_fn! { A B C D E F G H I }
impl_fn_trait_for_fn! { A B C D E F G H I J }
impl_fn_trait_for_fn! { A B C D E F G H I J K }
impl_fn_trait_for_fn! { A B C D E F G H I J K L }
