//! HTTP surface of the lease server: the lease endpoint and its middleware stack.

pub(crate) mod lease;
pub(crate) mod middleware;
pub(crate) mod router;
pub(crate) mod tls;
