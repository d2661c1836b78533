//! Stream framer: turns a TCP byte stream into complete `Message`s.
//!
//! A single read may carry zero, one, several, or a fraction of a message.
//! The framer buffers input and yields every complete ADU it can. Header
//! fields are validated as soon as they are buffered: a bad protocol id or
//! an out-of-range length is rejected without waiting for the body, so a
//! crafted length field cannot make us buffer unbounded input.
//!
//! After the first `FrameError` the framer is poisoned: it discards its
//! buffer and ignores further input. Ambiguous streams are never
//! resynchronized.

use bytes::{Buf, BytesMut};

use crate::error::FrameError;
use crate::protocol::mbap::{check_length, Message, MAX_ADU_LEN, MBAP_PREFIX_LEN, PROTOCOL_ID};

/// Per-connection reassembly buffer.
#[derive(Debug)]
pub struct Framer {
    buf: BytesMut,
    poisoned: bool,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_ADU_LEN),
            poisoned: false,
        }
    }

    /// Append `data` and return a lazy iterator over the messages now
    /// complete. Bytes of a trailing partial message stay buffered.
    pub fn feed(&mut self, data: &[u8]) -> Frames<'_> {
        if !self.poisoned {
            self.buf.extend_from_slice(data);
        }
        Frames { framer: self }
    }

    /// Try to cut one message from the buffer.
    ///
    /// `Ok(None)` means more input is needed (or the framer is poisoned).
    pub fn next_frame(&mut self) -> Result<Option<Message>, FrameError> {
        if self.poisoned {
            return Ok(None);
        }

        match self.peek_frame_len() {
            Ok(Some(total)) if self.buf.len() >= total => {
                let raw = self.buf.split_to(total).freeze();
                Message::decode(raw).map(Some).map_err(|e| self.poison(e))
            }
            Ok(_) => Ok(None),
            Err(e) => Err(self.poison(e)),
        }
    }

    /// Bytes of an incomplete message still buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether a framing error has been reported.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Validate whatever header bytes are available and return the full ADU
    /// length once the length field is known.
    fn peek_frame_len(&self) -> Result<Option<usize>, FrameError> {
        let mut hdr = &self.buf[..];
        if hdr.remaining() < 4 {
            return Ok(None);
        }
        hdr.advance(2); // transaction id
        let protocol_id = hdr.get_u16();
        if protocol_id != PROTOCOL_ID {
            return Err(FrameError::ProtocolMismatch(protocol_id));
        }

        if hdr.remaining() < 2 {
            return Ok(None);
        }
        let declared = hdr.get_u16();
        check_length(declared)?;

        Ok(Some(MBAP_PREFIX_LEN + declared as usize))
    }

    fn poison(&mut self, err: FrameError) -> FrameError {
        tracing::debug!(error = %err, discarded = self.buf.len(), "framer poisoned");
        self.poisoned = true;
        self.buf.clear();
        err
    }
}

/// Iterator returned by [`Framer::feed`].
///
/// Yields at most one `Err`, after which it ends.
pub struct Frames<'a> {
    framer: &'a mut Framer,
}

impl Iterator for Frames<'_> {
    type Item = Result<Message, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.framer.next_frame() {
            Ok(Some(msg)) => Some(Ok(msg)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
