//! Fixed-size byte buffers between the client and its transport.
//!
//! `Outbox` holds encoded packets until the transport accepts them, `Inbox`
//! accumulates received bytes until a complete frame is available. Both are
//! cleared whenever a session ends: nothing is carried across reconnects.

use core::task::Poll;

use crate::error::ProtocolError;
use crate::packet::{self, EncodePacket};
use crate::transport::MqttTransport;

/// Encoded packets waiting to be written.
pub struct Outbox<const SIZE: usize> {
    buf: [u8; SIZE],
    len: usize,
}

impl<const SIZE: usize> Outbox<SIZE> {
    pub const fn new() -> Self {
        Self {
            buf: [0; SIZE],
            len: 0,
        }
    }

    /// Appends an encoded packet. Fails without side effects if it does not fit.
    pub fn push<P: EncodePacket>(&mut self, packet: &P) -> Result<(), ProtocolError> {
        let written = packet.encode(&mut self.buf[self.len..])?;
        self.len += written;
        Ok(())
    }

    /// Offers the pending bytes to the transport once.
    ///
    /// Returns the number of bytes the transport accepted, `Poll::Pending`
    /// if it accepted none.
    pub fn flush<'a, T: MqttTransport<'a>>(
        &mut self,
        transport: &mut T,
    ) -> Poll<Result<usize, T::Error>> {
        if self.len == 0 {
            return Poll::Ready(Ok(0));
        }
        match transport.poll_send(&self.buf[..self.len]) {
            Poll::Ready(Ok(n)) => {
                let n = n.min(self.len);
                self.buf.copy_within(n..self.len, 0);
                self.len -= n;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl<const SIZE: usize> Default for Outbox<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

/// Received bytes not yet consumed as frames.
pub struct Inbox<const SIZE: usize> {
    buf: [u8; SIZE],
    len: usize,
}

impl<const SIZE: usize> Inbox<SIZE> {
    pub const fn new() -> Self {
        Self {
            buf: [0; SIZE],
            len: 0,
        }
    }

    /// Reads once from the transport into the free tail of the buffer.
    pub fn fill<'a, T: MqttTransport<'a>>(
        &mut self,
        transport: &mut T,
    ) -> Poll<Result<usize, T::Error>> {
        match transport.poll_recv(&mut self.buf[self.len..]) {
            Poll::Ready(Ok(n)) => {
                let n = n.min(SIZE - self.len);
                self.len += n;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    /// Length of the first complete frame, if one is buffered.
    ///
    /// A frame that can never fit the buffer is reported as
    /// `ProtocolError::PacketTooLarge`.
    pub fn frame_len(&self) -> Result<Option<usize>, ProtocolError> {
        match packet::frame_length(self.bytes())? {
            Some(len) => Ok(Some(len)),
            None if self.len == SIZE => Err(ProtocolError::PacketTooLarge),
            None => Ok(None),
        }
    }

    /// The buffered bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Drops the first `n` bytes.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.len);
        self.buf.copy_within(n..self.len, 0);
        self.len -= n;
    }

    #[cfg(test)]
    pub fn is_full(&self) -> bool {
        self.len == SIZE
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl<const SIZE: usize> Default for Inbox<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PingReq, Publish};
    use crate::transport::Endpoint;

    /// Accepts at most `chunk` bytes per call and serves `incoming` in one read.
    struct Trickle {
        chunk: usize,
        sent: [u8; 64],
        sent_len: usize,
        incoming: &'static [u8],
    }

    impl<'a> MqttTransport<'a> for Trickle {
        type Error = ();

        fn open(&mut self, _endpoint: &Endpoint<'a>) -> Result<(), ()> {
            Ok(())
        }

        fn poll_open(&mut self) -> Poll<Result<(), ()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_send(&mut self, buf: &[u8]) -> Poll<Result<usize, ()>> {
            let n = buf.len().min(self.chunk);
            self.sent[self.sent_len..self.sent_len + n].copy_from_slice(&buf[..n]);
            self.sent_len += n;
            Poll::Ready(Ok(n))
        }

        fn poll_recv(&mut self, buf: &mut [u8]) -> Poll<Result<usize, ()>> {
            if self.incoming.is_empty() {
                return Poll::Pending;
            }
            let n = buf.len().min(self.incoming.len());
            buf[..n].copy_from_slice(&self.incoming[..n]);
            self.incoming = &self.incoming[n..];
            Poll::Ready(Ok(n))
        }

        fn close(&mut self) {}
    }

    fn trickle(chunk: usize, incoming: &'static [u8]) -> Trickle {
        Trickle {
            chunk,
            sent: [0; 64],
            sent_len: 0,
            incoming,
        }
    }

    #[test]
    fn partial_writes_keep_the_remainder() {
        let mut outbox = Outbox::<32>::new();
        outbox.push(&PingReq).unwrap();
        outbox.push(&Publish::new("t", b"x")).unwrap();
        assert_eq!(outbox.len(), 2 + 6);

        let mut transport = trickle(3, b"");
        assert_eq!(outbox.flush(&mut transport), Poll::Ready(Ok(3)));
        assert_eq!(outbox.len(), 5);
        while !outbox.is_empty() {
            let _ = outbox.flush(&mut transport);
        }
        assert_eq!(
            &transport.sent[..transport.sent_len],
            &[0xC0, 0x00, 0x30, 0x04, 0x00, 0x01, b't', b'x']
        );
    }

    #[test]
    fn push_fails_cleanly_when_full() {
        let mut outbox = Outbox::<4>::new();
        outbox.push(&PingReq).unwrap();
        assert_eq!(
            outbox.push(&Publish::new("t", b"x")),
            Err(ProtocolError::PacketTooLarge)
        );
        assert_eq!(outbox.len(), 2);
    }

    #[test]
    fn inbox_splits_back_to_back_frames() {
        let mut inbox = Inbox::<16>::new();
        let mut transport = trickle(0, &[0xD0, 0x00, 0x30, 0x03, 0x00, 0x01]);
        assert_eq!(inbox.fill(&mut transport), Poll::Ready(Ok(6)));

        assert_eq!(inbox.frame_len(), Ok(Some(2)));
        inbox.consume(2);
        // second frame still lacks its last byte
        assert_eq!(inbox.frame_len(), Ok(None));
        assert_eq!(inbox.bytes(), &[0x30, 0x03, 0x00, 0x01]);
    }

    #[test]
    fn oversized_frame_is_rejected_once_buffer_is_full() {
        let mut inbox = Inbox::<4>::new();
        let mut transport = trickle(0, &[0x30, 0x10, 0x00, 0x01, 0xFF]);
        assert_eq!(inbox.fill(&mut transport), Poll::Ready(Ok(4)));
        assert!(inbox.is_full());
        assert_eq!(inbox.frame_len(), Err(ProtocolError::PacketTooLarge));
    }
}
