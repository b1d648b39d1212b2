pub mod backup;
pub mod broker;
pub mod error;
pub mod job;

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by every collaborator trait method.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
