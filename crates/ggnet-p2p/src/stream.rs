//! Stream completion signalling.
//!
//! When a stream frame is decoded the serving task lends its read half to
//! the consumer inside a StreamBody and parks on a StreamWait. Finishing the
//! body hands the read half back through the paired StreamAck, which is what
//! lets the task decode the next frame. Dropping an unfinished body abandons
//! the stream; the connection cannot be resynchronised after that.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::oneshot;

/// Read half of a connection as seen by decoders and consumers.
pub type FrameReader = Box<dyn AsyncRead + Send + Unpin>;

/// The consumer dropped a stream body without finishing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stream body dropped before it was finished")]
pub struct StreamAbandoned;

/// Pairs a consumer-side acknowledgement with a producer-side wait.
pub struct StreamGate;

impl StreamGate {
    pub fn open() -> (StreamAck, StreamWait) {
        let (tx, rx) = oneshot::channel();
        (StreamAck { tx }, StreamWait { rx })
    }
}

/// Consumer side: signals that the stream body has been fully read.
pub struct StreamAck {
    tx: oneshot::Sender<FrameReader>,
}

impl StreamAck {
    pub fn mark_consumed(self, reader: FrameReader) {
        // The waiter is gone only if the connection already shut down.
        let _ = self.tx.send(reader);
    }
}

/// Producer side: resolves once the consumer is done with the body.
pub struct StreamWait {
    rx: oneshot::Receiver<FrameReader>,
}

impl StreamWait {
    pub async fn wait(self) -> Result<FrameReader, StreamAbandoned> {
        self.rx.await.map_err(|_| StreamAbandoned)
    }
}

/// The body of a stream message, read directly off the sender's connection.
///
/// Read exactly the number of bytes agreed with the sender, then call
/// [`StreamBody::finish`]. The connection delivers nothing else until then.
pub struct StreamBody {
    from: SocketAddr,
    reader: Option<FrameReader>,
    ack: Option<StreamAck>,
}

impl StreamBody {
    pub fn new(from: SocketAddr, reader: FrameReader, ack: StreamAck) -> Self {
        Self {
            from,
            reader: Some(reader),
            ack: Some(ack),
        }
    }

    pub fn from(&self) -> SocketAddr {
        self.from
    }

    /// Give the connection back to its serving task.
    pub fn finish(mut self) {
        if let (Some(reader), Some(ack)) = (self.reader.take(), self.ack.take()) {
            ack.mark_consumed(reader);
        }
    }
}

impl AsyncRead for StreamBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().reader.as_mut() {
            Some(reader) => Pin::new(reader).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl fmt::Debug for StreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBody")
            .field("from", &self.from)
            .field("finished", &self.reader.is_none())
            .finish()
    }
}
