use crossbeam_channel::{Receiver, Sender, TryRecvError};

use ami_codec::Frame;

use crate::{Endpoint, FabricError};

/// An in-process [`Endpoint`] backed by a pair of `crossbeam-channel`s.
///
/// Grounded on `communication::allocator::zero_copy::shared_queue`'s
/// `SharedQueueSend`/`SharedQueueRecv`, which does the same job (a
/// bidirectional, in-process, channel-backed connection) over
/// `std::sync::mpsc`; this uses `crossbeam-channel` instead since AMI's
/// single-process `local` launcher (spec.md §6) needs several worker
/// threads to each own an endpoint without routing everything through one
/// mpsc consumer.
pub struct LocalEndpoint {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
}

/// Builds a connected pair: frames sent on one end arrive on the other.
pub fn local_pair() -> (LocalEndpoint, LocalEndpoint) {
    let (tx_a, rx_a) = crossbeam_channel::unbounded();
    let (tx_b, rx_b) = crossbeam_channel::unbounded();
    (LocalEndpoint { tx: tx_a, rx: rx_b }, LocalEndpoint { tx: tx_b, rx: rx_a })
}

impl Endpoint for LocalEndpoint {
    fn send(&self, frame: Frame) -> Result<(), FabricError> {
        self.tx.send(frame).map_err(|_| FabricError::Disconnected)
    }

    fn recv(&self) -> Result<Frame, FabricError> {
        self.rx.recv().map_err(|_| FabricError::Disconnected)
    }

    fn try_recv(&self) -> Result<Option<Frame>, FabricError> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(FabricError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ami_types::{Message, Value};
    use std::collections::BTreeMap;

    #[test]
    fn a_pair_delivers_frames_in_both_directions() {
        let (a, b) = local_pair();
        let mut payload = BTreeMap::new();
        payload.insert("x".to_string(), Value::Scalar(1.0));
        let msg = Message::datagram(1, 2, payload);
        let frame = Frame::encode(ami_codec::Channel::CollectorIn, 1, 0, "store", &msg).unwrap();

        a.send(frame.clone()).unwrap();
        let received = b.recv().unwrap();
        assert_eq!(received.topic, "store");

        assert!(a.try_recv().unwrap().is_none());
        b.send(frame).unwrap();
        assert!(a.try_recv().unwrap().is_some());
    }
}
