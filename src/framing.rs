use std::io::{self, Read, Write};
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::{CHUNK_SIZE, TAG_SIZE};

/// Bytes of frame header on the wire: 4-byte big-endian length plus 1 error
/// code byte.
pub const HEADER_SIZE: usize = 5;

/// Largest payload any legitimate frame carries: one full chunk ciphertext
/// (plaintext plus the AEAD tag). A peer declaring more is lying, and the
/// declared length is never trusted for allocation beyond this.
pub const MAX_FRAME_SIZE: usize = CHUNK_SIZE + TAG_SIZE;

/// One length-prefixed, error-code-tagged unit on the wire.
///
/// A non-zero code means the peer embedded an error in its data channel
/// instead of sending a separate message; the payload (possibly empty) still
/// travels with it.
#[derive(Debug)]
pub struct Frame {
    pub payload: Vec<u8>,
    pub code: u8,
}

impl Frame {
    /// Consume the frame, mapping a non-zero code through the error table.
    pub fn into_payload(self) -> Result<Vec<u8>> {
        match Error::decode_wire_code(self.code) {
            None => Ok(self.payload),
            Some(err) => Err(err),
        }
    }
}

/// Write one frame: length, code, payload. Three logical writes, one
/// byte-exact concatenation on the wire. Returns the total bytes written.
pub fn write_frame<W: Write>(stream: &mut W, payload: &[u8], code: u8) -> Result<usize> {
    let length =
        u32::try_from(payload.len()).map_err(|_| Error::FrameTooLarge(payload.len()))?;
    stream.write_all(&length.to_be_bytes())?;
    stream.write_all(&[code])?;
    stream.write_all(payload)?;
    Ok(HEADER_SIZE + payload.len())
}

/// Read one frame: exactly 4 length bytes, exactly 1 code byte, exactly
/// `length` payload bytes. A stream that ends early fails as `ShortRead`.
pub fn read_frame<R: Read>(stream: &mut R) -> Result<Frame> {
    let mut length_bytes = [0u8; 4];
    read_exact_or_short(stream, &mut length_bytes)?;
    let length = u32::from_be_bytes(length_bytes) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge(length));
    }

    let mut code = [0u8; 1];
    read_exact_or_short(stream, &mut code)?;

    let mut payload = vec![0u8; length];
    read_exact_or_short(stream, &mut payload)?;

    Ok(Frame {
        payload,
        code: code[0],
    })
}

/// `read_exact` with EOF normalized to the protocol's `ShortRead` kind.
pub(crate) fn read_exact_or_short<R: Read>(stream: &mut R, buf: &mut [u8]) -> Result<()> {
    stream.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::ShortRead,
        _ => Error::Io(e),
    })
}

/// A pool of fixed-size reusable buffers for bulk chunk copies.
///
/// Checkout validates the requested size against the pool's buffer size
/// before handing a buffer out; the buffer returns to the pool on drop.
#[derive(Debug)]
pub struct BufferPool {
    buffer_size: usize,
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(buffer_size: usize) -> Self {
        BufferPool {
            buffer_size,
            buffers: Mutex::new(Vec::new()),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Check out a buffer able to hold `needed` bytes.
    pub fn checkout(&self, needed: usize) -> Result<PooledBuffer<'_>> {
        if needed > self.buffer_size {
            return Err(Error::BufferTooSmall {
                needed,
                capacity: self.buffer_size,
            });
        }
        let buffer = self
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size]);
        Ok(PooledBuffer {
            pool: self,
            buffer: Some(buffer),
        })
    }

    fn give_back(&self, buffer: Vec<u8>) {
        self.lock().push(buffer);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        self.buffers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A checked-out pool buffer; derefs to the full fixed-size byte slice and
/// returns itself to the pool when dropped.
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buffer: Option<Vec<u8>>,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.give_back(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_round_trip_lengths_and_codes() {
        for length in [0usize, 1, 4095, 4096] {
            for code in [0u8, 5, 255] {
                let payload = vec![0xA5u8; length];
                let mut wire = Vec::new();
                let written = write_frame(&mut wire, &payload, code).expect("write frame");
                assert_eq!(written, HEADER_SIZE + length);
                assert_eq!(wire.len(), written);

                let frame = read_frame(&mut Cursor::new(&wire)).expect("read frame");
                assert_eq!(frame.payload, payload);
                assert_eq!(frame.code, code);

                match (code, frame.into_payload()) {
                    (0, Ok(p)) => assert_eq!(p.len(), length),
                    (5, Err(Error::Peer(c))) => assert_eq!(c.as_byte(), 5),
                    (255, Err(Error::UnknownErrorCode(255))) => {}
                    (c, other) => panic!("code {c} mapped to {other:?}"),
                }
            }
        }
    }

    #[test]
    fn header_layout_is_big_endian_length_then_code() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"abc", 7).unwrap();
        assert_eq!(&wire[..4], &[0, 0, 0, 3]);
        assert_eq!(wire[4], 7);
        assert_eq!(&wire[5..], b"abc");
    }

    #[test]
    fn truncated_stream_is_short_read() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[1, 2, 3, 4], 0).unwrap();

        // cut the stream at every point inside the frame
        for cut in 0..wire.len() {
            let result = read_frame(&mut Cursor::new(&wire[..cut]));
            assert!(
                matches!(result, Err(Error::ShortRead)),
                "cut at {cut} gave {result:?}"
            );
        }
    }

    #[test]
    fn empty_payload_with_error_code_still_travels() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[], 6).unwrap();
        let frame = read_frame(&mut Cursor::new(&wire)).unwrap();
        assert!(frame.payload.is_empty());
        assert!(matches!(frame.into_payload(), Err(Error::Peer(_))));
    }

    #[test]
    fn pool_reuses_returned_buffers() {
        let pool = BufferPool::new(64);
        {
            let mut buf = pool.checkout(64).unwrap();
            buf[0] = 0xEE;
        }
        // the buffer went back; a second checkout must not allocate a new one
        let buf = pool.checkout(10).unwrap();
        assert_eq!(buf.len(), 64);
        assert_eq!(buf[0], 0xEE);
        assert_eq!(pool.lock().len(), 0);
        drop(buf);
        assert_eq!(pool.lock().len(), 1);
    }

    #[test]
    fn pool_rejects_oversized_requests() {
        let pool = BufferPool::new(16);
        let result = pool.checkout(17);
        match result {
            Err(Error::BufferTooSmall { needed, capacity }) => {
                assert_eq!(needed, 17);
                assert_eq!(capacity, 16);
            }
            other => panic!("expected capacity error, got {other:?}"),
        };
    }

    #[test]
    fn hostile_length_declaration_is_rejected_before_allocating() {
        // a 5-byte header claiming a payload bigger than any legal frame
        let declared = (MAX_FRAME_SIZE + 1) as u32;
        let mut wire = Vec::new();
        wire.extend_from_slice(&declared.to_be_bytes());
        wire.push(0);

        match read_frame(&mut Cursor::new(&wire)) {
            Err(Error::FrameTooLarge(len)) => assert_eq!(len, MAX_FRAME_SIZE + 1),
            other => panic!("expected frame-too-large error, got {other:?}"),
        }
    }
}
