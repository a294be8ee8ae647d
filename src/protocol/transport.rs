use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::trace;
use thiserror::Error;

use super::{
    handshake::{
        CHOICE_SIZE, HandshakeError, OFFER_COUNT, PREAMBLE_SIZE, VersionOffer, decode_choice,
        decode_preamble, encode_choice, encode_preamble,
    },
    version::ProtocolVersion,
};

/// Chunk sizes are written as a u16.
pub const MAX_CHUNK_SIZE: usize = u16::MAX as usize;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
const READ_SIZE: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("failed to decode message: {0}")]
    Pack(#[from] crate::packstream::PackError),
    #[error("message of at least {size} bytes exceeds the limit of {limit}")]
    MessageTooLarge { size: usize, limit: usize },
    #[error("stream ended in the middle of a message")]
    Truncated,
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
}

/// Reassembles chunked messages from bytes that arrive in arbitrary pieces.
///
/// Each chunk is a big-endian u16 size followed by that many bytes; a zero
/// size ends the message. A zero size with nothing buffered is a keep-alive
/// and is skipped.
#[derive(Debug)]
pub struct MessageFramer {
    message: BytesMut,
    max_message_size: usize,
}

impl Default for MessageFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl MessageFramer {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            message: BytesMut::new(),
            max_message_size,
        }
    }

    /// No partial message is buffered.
    pub fn is_idle(&self) -> bool {
        self.message.is_empty()
    }

    /// Consumes whole chunks from `src`. Returns `Ok(None)` when more bytes are
    /// needed; whatever is left in `src` is an incomplete chunk.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, TransportError> {
        loop {
            if src.len() < 2 {
                return Ok(None);
            }
            let size = u16::from_be_bytes([src[0], src[1]]) as usize;
            if size == 0 {
                src.advance(2);
                if self.message.is_empty() {
                    trace!("noop");
                    continue;
                }
                trace!("message of {} bytes", self.message.len());
                return Ok(Some(self.message.split().freeze()));
            }
            if src.len() < 2 + size {
                return Ok(None);
            }
            let total = self.message.len() + size;
            if total > self.max_message_size {
                return Err(TransportError::MessageTooLarge {
                    size: total,
                    limit: self.max_message_size,
                });
            }
            src.advance(2);
            self.message.extend_from_slice(&src.split_to(size));
        }
    }

    /// Appends `message` to `dst` in chunks of at most `max_chunk_size`.
    pub fn encode(message: &[u8], max_chunk_size: usize, dst: &mut BytesMut) {
        let max_chunk_size = max_chunk_size.clamp(1, MAX_CHUNK_SIZE);
        dst.reserve(message.len() + 2 * (message.len() / max_chunk_size + 2));
        for chunk in message.chunks(max_chunk_size) {
            dst.put_u16(chunk.len() as u16);
            dst.put_slice(chunk);
        }
        dst.put_u16(0);
    }
}

/// Handshake bytes and chunked messages over a blocking stream.
pub struct ProtocolTransport<T: Read + Write> {
    stream: T,
    buffer: BytesMut,
    framer: MessageFramer,
    max_chunk_size: usize,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self::with_limits(stream, MAX_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_limits(stream: T, max_chunk_size: usize, max_message_size: usize) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_SIZE),
            framer: MessageFramer::new(max_message_size),
            max_chunk_size,
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }

    pub fn into_inner(self) -> T {
        self.stream
    }

    pub fn read_preamble(&mut self) -> Result<[VersionOffer; OFFER_COUNT], TransportError> {
        let mut bytes = [0u8; PREAMBLE_SIZE];
        self.stream.read_exact(&mut bytes)?;
        Ok(decode_preamble(&bytes)?)
    }

    pub fn write_preamble(&mut self, offers: &[VersionOffer]) -> Result<(), TransportError> {
        self.stream.write_all(&encode_preamble(offers)?)?;
        self.stream.flush()?;
        Ok(())
    }

    pub fn read_choice(&mut self) -> Result<Option<ProtocolVersion>, TransportError> {
        let mut bytes = [0u8; CHOICE_SIZE];
        self.stream.read_exact(&mut bytes)?;
        Ok(decode_choice(&bytes)?)
    }

    pub fn write_choice(&mut self, choice: Option<ProtocolVersion>) -> Result<(), TransportError> {
        self.stream.write_all(&encode_choice(choice)?)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Blocks until a whole message has arrived. `Ok(None)` means the peer
    /// closed the stream between messages.
    pub fn read_message(&mut self) -> Result<Option<Bytes>, TransportError> {
        let mut chunk = [0u8; READ_SIZE];
        loop {
            if let Some(message) = self.framer.decode(&mut self.buffer)? {
                return Ok(Some(message));
            }
            let n = match self.stream.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                if self.buffer.is_empty() && self.framer.is_idle() {
                    return Ok(None);
                }
                return Err(TransportError::Truncated);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    pub fn write_message(&mut self, message: &[u8]) -> Result<(), TransportError> {
        self.write_messages([message])
    }

    /// Writes several messages with a single write call.
    pub fn write_messages<'a>(
        &mut self,
        messages: impl IntoIterator<Item = &'a [u8]>,
    ) -> Result<(), TransportError> {
        let mut out = BytesMut::new();
        for message in messages {
            MessageFramer::encode(message, self.max_chunk_size, &mut out);
        }
        self.stream.write_all(&out)?;
        self.stream.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn rewound(transport: &mut ProtocolTransport<Cursor<Vec<u8>>>) {
        transport.stream.set_position(0);
    }

    #[test]
    fn read_write_message() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        transport.write_message(&[0xB0, 0x0F]).unwrap();
        assert_eq!(transport.get_ref().get_ref(), &vec![0x00, 0x02, 0xB0, 0x0F, 0x00, 0x00]);

        rewound(&mut transport);
        assert_eq!(transport.read_message().unwrap().as_deref(), Some(&[0xB0, 0x0F][..]));
        assert_eq!(transport.read_message().unwrap(), None);
    }

    #[test]
    fn long_messages_are_split_into_chunks() {
        let mut transport = ProtocolTransport::with_limits(Cursor::new(Vec::new()), 3, 1024);
        transport.write_message(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(
            transport.get_ref().get_ref(),
            &vec![0, 3, 1, 2, 3, 0, 2, 4, 5, 0, 0]
        );
        rewound(&mut transport);
        assert_eq!(
            transport.read_message().unwrap().as_deref(),
            Some(&[1, 2, 3, 4, 5][..])
        );
    }

    #[test]
    fn noops_are_skipped() {
        let bytes = vec![0, 0, 0, 0, 0, 1, 0xC0, 0, 0, 0, 0];
        let mut transport = ProtocolTransport::new(Cursor::new(bytes));
        assert_eq!(transport.read_message().unwrap().as_deref(), Some(&[0xC0][..]));
        assert_eq!(transport.read_message().unwrap(), None);
    }

    #[test]
    fn eof_inside_a_message_is_an_error() {
        let mut transport = ProtocolTransport::new(Cursor::new(vec![0, 4, 1, 2]));
        assert!(matches!(
            transport.read_message(),
            Err(TransportError::Truncated)
        ));
    }

    #[test]
    fn framer_waits_for_whole_chunks() {
        let mut framer = MessageFramer::default();
        let mut src = BytesMut::new();
        for byte in [0, 2, 0xB0, 0x0F, 0] {
            src.put_u8(byte);
            assert_eq!(framer.decode(&mut src).unwrap(), None);
        }
        src.put_u8(0);
        assert_eq!(
            framer.decode(&mut src).unwrap().as_deref(),
            Some(&[0xB0, 0x0F][..])
        );
        assert!(src.is_empty());
        assert!(framer.is_idle());
    }

    #[test]
    fn framer_enforces_message_limit() {
        let mut framer = MessageFramer::new(4);
        let mut src = BytesMut::from(&[0, 3, 1, 2, 3, 0, 3, 4, 5, 6][..]);
        assert!(matches!(
            framer.decode(&mut src),
            Err(TransportError::MessageTooLarge { size: 6, limit: 4 })
        ));
    }

    #[test]
    fn handshake_round_trip() {
        let offers = [VersionOffer::range(ProtocolVersion::new(5, 8), 8)];
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        transport.write_preamble(&offers).unwrap();
        transport.write_choice(Some(ProtocolVersion::new(5, 8))).unwrap();
        rewound(&mut transport);
        assert_eq!(transport.read_preamble().unwrap()[0], offers[0]);
        assert_eq!(transport.read_choice().unwrap(), Some(ProtocolVersion::new(5, 8)));
    }
}
