//! C1: Local HTTP surface. A bare hyper server bound to loopback (§4.1) plus
//! the in-process `Router::invoke` primitive shared with the tunnel-side
//! dispatcher (C3) — both entry points answer through the identical route
//! table so a cloud-originated request and a local curl are indistinguishable
//! once inside the router.

mod handlers;
pub mod router;
pub mod server;
pub mod xdo;

pub use router::{HttpResponse, Router};
