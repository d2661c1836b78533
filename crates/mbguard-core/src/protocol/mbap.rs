//! Modbus application data unit (ADU) model.
//!
//! Wire layout (big-endian):
//! `transaction_id:u16 | protocol_id:u16 | length:u16 | unit_id:u8 | function_code:u8 | payload`
//!
//! `length` counts every byte after itself: unit id, function code, payload.
//!
//! Parsing rules:
//! - Never index (`buf[0]`), always use `Buf` and `remaining()` checks.
//! - Never `unwrap()` / `expect()` / `panic!()` in production paths.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Modbus protocol identifier; any other value is not Modbus.
pub const PROTOCOL_ID: u16 = 0x0000;

/// Bytes preceding the unit id: transaction id, protocol id, length.
pub const MBAP_PREFIX_LEN: usize = 6;

/// Smallest legal `length`: unit id + function code.
pub const MIN_LENGTH: u16 = 2;

/// Largest legal `length`: unit id + 253-byte PDU.
pub const MAX_LENGTH: u16 = 254;

/// Largest complete ADU on the wire.
pub const MAX_ADU_LEN: usize = MBAP_PREFIX_LEN + MAX_LENGTH as usize;

/// Bit set in the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Parsed Modbus TCP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Client-chosen id echoed by the server.
    pub transaction_id: u16,
    /// Addressed unit (slave id).
    pub unit_id: u8,
    /// Requested operation.
    pub function_code: u8,
    /// PDU data after the function code (zero-copy).
    pub payload: Bytes,
    /// Declared `length` field; always equals `1 + 1 + payload.len()`.
    pub raw_length: u16,
    /// The complete ADU exactly as received, forwarded unmodified.
    pub raw: Bytes,
}

impl Message {
    /// Build a request/response ADU from its parts.
    ///
    /// Fails when the payload would push the `length` field past the
    /// protocol maximum.
    pub fn build(
        transaction_id: u16,
        unit_id: u8,
        function_code: u8,
        payload: &[u8],
    ) -> Result<Self, FrameError> {
        let declared = payload.len().saturating_add(2);
        let raw_length = u16::try_from(declared).unwrap_or(u16::MAX);
        check_length(raw_length)?;
        Ok(Self::assemble(transaction_id, unit_id, function_code, payload, raw_length))
    }

    fn assemble(transaction_id: u16, unit_id: u8, function_code: u8, payload: &[u8], raw_length: u16) -> Self {

        let mut out = BytesMut::with_capacity(MBAP_PREFIX_LEN + raw_length as usize);
        out.put_u16(transaction_id);
        out.put_u16(PROTOCOL_ID);
        out.put_u16(raw_length);
        out.put_u8(unit_id);
        out.put_u8(function_code);
        out.put_slice(payload);
        let raw = out.freeze();

        Self {
            transaction_id,
            unit_id,
            function_code,
            payload: raw.slice(MBAP_PREFIX_LEN + 2..),
            raw_length,
            raw,
        }
    }

    /// Decode one complete ADU. `raw` must hold exactly one message.
    pub fn decode(raw: Bytes) -> Result<Self, FrameError> {
        let mut buf = raw.clone();
        if buf.remaining() < MBAP_PREFIX_LEN {
            return Err(FrameError::LengthOutOfRange {
                declared: 0,
                min: MIN_LENGTH,
                max: MAX_LENGTH,
            });
        }

        let transaction_id = buf.get_u16();
        let protocol_id = buf.get_u16();
        if protocol_id != PROTOCOL_ID {
            return Err(FrameError::ProtocolMismatch(protocol_id));
        }

        let raw_length = buf.get_u16();
        check_length(raw_length)?;
        if buf.remaining() != raw_length as usize {
            return Err(FrameError::LengthOutOfRange {
                declared: raw_length,
                min: MIN_LENGTH,
                max: MAX_LENGTH,
            });
        }

        let unit_id = buf.get_u8();
        let function_code = buf.get_u8();
        let payload = buf.copy_to_bytes(buf.remaining());

        Ok(Self {
            transaction_id,
            unit_id,
            function_code,
            payload,
            raw_length,
            raw,
        })
    }

    /// True for a server exception reply (function code high bit set).
    pub fn is_exception(&self) -> bool {
        self.function_code & EXCEPTION_FLAG != 0
    }

    /// Exception reply for this request, echoing transaction and unit id.
    pub fn exception_response(&self, exception_code: u8) -> Self {
        Self::assemble(
            self.transaction_id,
            self.unit_id,
            self.function_code | EXCEPTION_FLAG,
            &[exception_code],
            3,
        )
    }
}

/// Validate a declared `length` field against protocol bounds.
pub fn check_length(declared: u16) -> Result<(), FrameError> {
    if !(MIN_LENGTH..=MAX_LENGTH).contains(&declared) {
        return Err(FrameError::LengthOutOfRange {
            declared,
            min: MIN_LENGTH,
            max: MAX_LENGTH,
        });
    }
    Ok(())
}
