use crate::error::DispatchError;
use crate::extract::from_request::FromRequest;
use crate::request::Request;
use async_trait::async_trait;

/// Extracts the arguments of a handler from left to right, the first failure wins.
macro_rules! impl_from_request_for_tuple {
    ($($param:ident)*) => {
        #[async_trait]
        impl<$($param,)*> FromRequest for ($($param,)*)
        where
            $($param: FromRequest,)*
        {
            #[allow(non_snake_case)]
            async fn from_request(req: &Request) -> Result<Self, DispatchError> {
                Ok(($($param::from_request(req).await?,)*))
            }
        }
    }
}

impl_from_request_for_tuple! { A }
impl_from_request_for_tuple! { A B }
impl_from_request_for_tuple! { A B C }
impl_from_request_for_tuple! { A B C D }
impl_from_request_for_tuple! { A B C D E }
impl_from_request_for_tuple! { A B C D E F }
impl_from_request_for_tuple! { A B C D E F G }
impl_from_request_for_tuple! { A B C D E F G H }
impl_from_request_for_tuple! { A B C D E F G H I }
impl_from_request_for_tuple! { A B C D E F G H I J }
impl_from_request_for_tuple! { A B C D E F G H I J K }
impl_from_request_for_tuple! { A B C D E F G H I J K L }
