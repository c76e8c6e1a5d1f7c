//! Small helpers shared by the manager/worker/collector binaries for moving
//! typed payloads over an [`ami_fabric::Endpoint`].

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use ami_codec::{Channel, Frame};
use ami_fabric::Endpoint;

pub struct Link<E: Endpoint> {
    endpoint: E,
    identity: u64,
    seqno: AtomicU64,
}

impl<E: Endpoint> Link<E> {
    pub fn new(endpoint: E, identity: u64) -> Self {
        Link { endpoint, identity, seqno: AtomicU64::new(0) }
    }

    pub fn send<T: Serialize>(&self, channel: Channel, topic: &str, payload: &T) -> Result<()> {
        let seqno = self.seqno.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::encode(channel, self.identity, seqno, topic, payload)?;
        self.endpoint.send(frame)?;
        Ok(())
    }

    pub fn recv<T: DeserializeOwned>(&self) -> Result<T> {
        let frame = self.endpoint.recv()?;
        Ok(frame.decode()?)
    }

    pub fn try_recv<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.endpoint.try_recv()? {
            Some(frame) => Ok(Some(frame.decode()?)),
            None => Ok(None),
        }
    }
}
