//! Client side of the binary RPC transport.

pub mod frame;
pub mod proto;
pub mod tcp;

use async_trait::async_trait;

use crate::core::Result;

pub use frame::{MAX_FRAME_LEN, encode_frame, read_frame, write_frame};
pub use proto::{Envelope, Reply, Request, Response, WireError};
pub use tcp::TcpTransport;

/// A session to the store that carries request envelopes and returns the
/// matching responses. Implementations must allow concurrent calls.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, envelope: Envelope) -> Result<Response>;

    async fn close(&self) -> Result<()>;
}
