use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;

use ami_codec::{read_frame, write_frame, Frame};

use crate::{Endpoint, FabricError};

/// A TCP-backed [`Endpoint`].
///
/// Wraps the stream in a `Mutex` rather than splitting it into separate
/// read/write halves: every AMI connection here carries one request/reply
/// or one producer/consumer relationship at a time, so there is never a
/// legitimate concurrent reader and writer racing for the same socket.
pub struct TcpEndpoint {
    stream: Mutex<TcpStream>,
}

impl TcpEndpoint {
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(TcpEndpoint { stream: Mutex::new(stream) })
    }

    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(TcpEndpoint { stream: Mutex::new(stream) })
    }
}

impl Endpoint for TcpEndpoint {
    fn send(&self, frame: Frame) -> Result<(), FabricError> {
        let mut stream = self.stream.lock().expect("tcp endpoint mutex poisoned");
        write_frame(&mut *stream, &frame)?;
        Ok(())
    }

    fn recv(&self) -> Result<Frame, FabricError> {
        let mut stream = self.stream.lock().expect("tcp endpoint mutex poisoned");
        read_frame(&mut *stream)?.ok_or(FabricError::Disconnected)
    }

    fn try_recv(&self) -> Result<Option<Frame>, FabricError> {
        let mut stream = self.stream.lock().expect("tcp endpoint mutex poisoned");
        stream.set_nonblocking(true)?;
        let result = match read_frame(&mut *stream) {
            Ok(frame) => Ok(frame),
            Err(ami_codec::CodecError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        };
        stream.set_nonblocking(false)?;
        result
    }
}
