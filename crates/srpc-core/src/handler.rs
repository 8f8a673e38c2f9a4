//! Application handler trait.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{BoxError, Call, Response};

/// Future returned by [`Handler::on_call`].
pub type HandlerFuture =
    Pin<Box<dyn Future<Output = Result<Response, BoxError>> + Send + 'static>>;

/// The application side of a connection.
///
/// `on_call` runs on its own task for every incoming call accepted while the
/// connection is open, and must eventually complete — a call the handler
/// never answers keeps the connection from ever gracefully closing.
/// Returning `Err` never reaches the peer as-is: the connection logs it and
/// answers with an internal-error response instead.
pub trait Handler: Send + Sync + 'static {
    /// Answer one incoming call.
    fn on_call(&self, call: Call) -> HandlerFuture;

    /// Invoked once when the transport disconnects, whether the close was
    /// local or remote. Default: nothing.
    fn on_disconnect(&self) {}
}

impl<H: Handler> Handler for Arc<H> {
    fn on_call(&self, call: Call) -> HandlerFuture {
        (**self).on_call(call)
    }

    fn on_disconnect(&self) {
        (**self).on_disconnect();
    }
}

/// Wrap an async closure as a [`Handler`] with a no-op disconnect hook.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, BoxError>> + Send + 'static,
{
    HandlerFn {
        f: Box::new(move |call| Box::pin(f(call))),
    }
}

/// [`Handler`] adapter returned by [`handler_fn`].
pub struct HandlerFn {
    f: Box<dyn Fn(Call) -> HandlerFuture + Send + Sync>,
}

impl Handler for HandlerFn {
    fn on_call(&self, call: Call) -> HandlerFuture {
        (self.f)(call)
    }
}
