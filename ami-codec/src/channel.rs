//! The six logical channels of the messaging fabric (spec.md §6).

use serde::{Deserialize, Serialize};

/// Which logical socket a [`crate::Frame`] travels on.
///
/// A single TCP connection can multiplex several of these; the channel tag
/// tells the receiver which handler queue to deliver the frame to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Datagrams and transitions flowing from upstream into a collector tier.
    CollectorIn,
    /// Manager → workers/collectors: `init`/`graph`/`add`/`del`/`purge`/`cmd`.
    GraphControl,
    /// Clients → manager request/reply.
    ClientComm,
    /// Out-of-band messages from workers/collectors to the manager.
    NodeMessage,
    /// Manager → clients: `sources`, progress.
    Info,
    /// Manager → export service: `graph`/`store`/`info`/`data`/`destroy`/`heartbeat`.
    Export,
}
