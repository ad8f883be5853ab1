//! The length-prefixed JSON RPC envelope protocol that runs over the
//! canonical `kind="rpc"` multiplexed stream.

pub mod client;
pub mod envelope;
pub mod server;

pub use client::{RpcCallError, RpcClient};
pub use envelope::Envelope;
pub use server::{RpcContext, RpcServer};
