//! JSON-RPC module
//!
//! The bridge this node uses to reach peer chains (client side) and the
//! HTTP interface it answers the same methods on (server side).

mod bridge;
mod client;
mod methods;
mod server;

pub use bridge::*;
pub use client::*;
pub use methods::*;
pub use server::*;
