//! Point-to-point transport between AMI processes.
//!
//! Two implementations of the same [`Endpoint`] trait: [`tcp::TcpEndpoint`]
//! for real inter-process connections (modeled on
//! `communication::networking`'s socket setup, minus its multi-process
//! handshake - every AMI connection here is a single logical point-to-point
//! link rather than an all-to-all mesh), and [`local::LocalEndpoint`] for
//! the single-process `local` launcher and for tests, backed by
//! `crossbeam-channel` the way `communication::allocator::zero_copy`'s
//! `SharedQueueSend`/`SharedQueueRecv` are backed by `std::sync::mpsc`.

mod local;
mod tcp;

pub use ami_codec::Frame;
pub use local::{local_pair, LocalEndpoint};
pub use tcp::TcpEndpoint;

/// Failures sending or receiving a [`Frame`] over an [`Endpoint`].
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    #[error("codec error: {0}")]
    Codec(#[from] ami_codec::CodecError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("the peer has disconnected")]
    Disconnected,
}

/// A bidirectional, blocking, frame-oriented connection to one peer.
pub trait Endpoint {
    fn send(&self, frame: Frame) -> Result<(), FabricError>;

    /// Blocks until a frame arrives or the peer disconnects.
    fn recv(&self) -> Result<Frame, FabricError>;

    /// Returns immediately with `Ok(None)` if nothing is available yet.
    fn try_recv(&self) -> Result<Option<Frame>, FabricError>;
}
