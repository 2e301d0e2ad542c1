//! DHCPv6 wire codec.
//!
//! A DHCPv6 message is a 1-byte message type, a 3-byte transaction id, and
//! then a flat sequence of TLV options: 2-byte code, 2-byte big-endian
//! length, payload. IA containers nest further options inside their payload
//! using the same TLV layout.
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    msg-type   |               transaction-id                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          option-code          |         option-len            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        option-data ...                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Parsing is zero-copy: [`Reader`] walks a borrowed byte slice and
//! [`OptionView`] borrows each option's payload in place. Encoding uses a
//! fixed-capacity [`Writer`] whose [`begin_option`](Writer::begin_option) /
//! [`end_option`](Writer::end_option) pair backpatches the length field once
//! the payload size is known, so nested containers never need a second pass.
//!
//! # References
//!
//! - RFC 8415: Dynamic Host Configuration Protocol for IPv6

use crate::error::{Error, Result};

/// Offset where options begin, after message type and transaction id.
pub const HEADER_LEN: usize = 4;

/// Capacity for reply buffers: an ethernet MTU minus IPv6 and UDP
/// headers, so a reply always fits one unfragmented datagram.
pub const REPLY_BUF_LEN: usize = 1472;

/// Fixed DHCPv6 message header: type plus 24-bit transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw message type byte. Unknown types are preserved so the caller
    /// can decide to drop them.
    pub msg_type: u8,
    /// Transaction id, echoed verbatim into the reply.
    pub txid: [u8; 3],
}

impl Header {
    /// Parses the fixed header and returns a [`Reader`] positioned at the
    /// first option.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if the input is shorter than
    /// [`HEADER_LEN`].
    pub fn parse(data: &[u8]) -> Result<(Self, Reader<'_>)> {
        let mut r = Reader::new(data);
        let msg_type = r.read_u8()?;
        let tx = r.read_bytes(3)?;
        let header = Self {
            msg_type,
            txid: [tx[0], tx[1], tx[2]],
        };
        Ok((header, r))
    }
}

/// A borrowed view of one TLV option.
#[derive(Debug, Clone, Copy)]
pub struct OptionView<'a> {
    /// Raw option code.
    pub code: u16,
    /// Option payload, length already validated against the input.
    pub value: &'a [u8],
}

impl<'a> OptionView<'a> {
    /// Returns a [`Reader`] over this option's payload, for IA containers
    /// that nest further options.
    pub fn reader(&self) -> Reader<'a> {
        Reader::new(self.value)
    }
}

/// Bounds-checked big-endian read cursor over a borrowed byte slice.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Returns true when the cursor has consumed all input.
    pub fn is_empty(&self) -> bool {
        self.offset == self.data.len()
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = self.read_bytes(1)?;
        Ok(b[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Borrows the next `len` bytes without copying.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.data.len() - self.offset < len {
            return Err(Error::InvalidPacket(format!(
                "truncated at offset {}: need {} bytes, have {}",
                self.offset,
                len,
                self.data.len() - self.offset
            )));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Advances past the next TLV option and returns a view of it.
    ///
    /// Returns `Ok(None)` exactly at end of input. A partial option header
    /// or a declared length running past the input is an error; the caller
    /// drops the whole packet.
    pub fn next_option(&mut self) -> Result<Option<OptionView<'a>>> {
        if self.is_empty() {
            return Ok(None);
        }
        let code = self.read_u16()?;
        let vlen = self.read_u16()? as usize;
        let value = self.read_bytes(vlen)?;
        Ok(Some(OptionView { code, value }))
    }
}

/// Position of an open option's length field, held until
/// [`Writer::end_option`] backpatches it.
#[derive(Debug, Clone, Copy)]
pub struct OptionMark {
    len_pos: usize,
    val_pos: usize,
}

/// Big-endian write cursor with a fixed capacity ceiling.
///
/// Every write is checked against the capacity; an overflow surfaces as
/// [`Error::BufferFull`] and the caller abandons the reply.
#[derive(Debug)]
pub struct Writer {
    buf: Vec<u8>,
    cap: usize,
}

impl Writer {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
            cap,
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the writer and returns the finished datagram.
    pub fn into_payload(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_bytes(&[v])
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_bytes(&mut self, src: &[u8]) -> Result<()> {
        if self.cap - self.buf.len() < src.len() {
            return Err(Error::BufferFull(self.buf.len()));
        }
        self.buf.extend_from_slice(src);
        Ok(())
    }

    /// Writes the fixed message header.
    pub fn write_header(&mut self, msg_type: u8, txid: [u8; 3]) -> Result<()> {
        self.write_u8(msg_type)?;
        self.write_bytes(&txid)
    }

    /// Opens a TLV option: writes the code and a zero length placeholder.
    ///
    /// Marks may nest; close them innermost-first with
    /// [`end_option`](Self::end_option).
    pub fn begin_option(&mut self, code: u16) -> Result<OptionMark> {
        self.write_u16(code)?;
        let len_pos = self.buf.len();
        self.write_u16(0)?;
        Ok(OptionMark {
            len_pos,
            val_pos: self.buf.len(),
        })
    }

    /// Closes an option by backpatching its length field with the number of
    /// payload bytes written since the matching
    /// [`begin_option`](Self::begin_option).
    pub fn end_option(&mut self, mark: OptionMark) -> Result<()> {
        let vlen = self.buf.len() - mark.val_pos;
        if vlen > u16::MAX as usize {
            return Err(Error::OptionTooLong(vlen));
        }
        let be = (vlen as u16).to_be_bytes();
        self.buf[mark.len_pos] = be[0];
        self.buf[mark.len_pos + 1] = be[1];
        Ok(())
    }
}
