//! The public carrier: accepts paired WebSocket connections, validates
//! their attach tokens, and forwards FSEC records between a channel's
//! client and server endpoint without ever decrypting them.

mod attach;
mod channel;
mod cleanup;
mod config;
mod error;
mod observer;
mod pump;
mod server;
mod socket;
mod socket_poem;
mod write_queue;

pub use config::{AllowedOrigin, ConfigError, TunnelConfig};
pub use error::{CloseCategory, TunnelError};
pub use observer::{NoopObserver, TunnelObserver};
pub use server::{Stats, TunnelServer};
pub use socket::{SocketMessage, TunnelSocketRead, TunnelSocketWrite};
