//! Host side of the control channel: framing an image into records and reading the replies.

use core::fmt::{self, Write};

use crate::{register::JedecId, SECTOR_SIZE};

/// Payload size the host uses per record, one sector
pub const RECORD_SIZE: usize = SECTOR_SIZE as usize;

/// Record that ends a programming stream
pub const END_OF_STREAM: &[u8] = b"0\r\n";

const PROGRESS_KEY: &str = "flash_prog=";
const FLASH_ID_KEY: &str = "tt.flash_id=";

/// A `flash_prog=` reply
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Address the next record will be written at
    Address(u32),
    /// The stream is complete
    Done,
}

impl Progress {
    /// Bytes of a `total` byte image started at `start` that are on the chip
    pub fn written(&self, start: u32, total: usize) -> usize {
        match *self {
            Progress::Address(addr) => (addr.saturating_sub(start) as usize).min(total),
            Progress::Done => total,
        }
    }
}

/// Parse a `flash_prog=` line, `None` for any other line
pub fn parse_progress(line: &str) -> Option<Progress> {
    let value = line.trim().strip_prefix(PROGRESS_KEY)?;
    if value == "ok" {
        return Some(Progress::Done);
    }
    u32::from_str_radix(value, 16).ok().map(Progress::Address)
}

/// Parse a `tt.flash_id=` line
pub fn parse_flash_id(line: &str) -> Option<JedecId> {
    let value = line.trim().strip_prefix(FLASH_ID_KEY)?;
    if value.len() != 6 {
        return None;
    }
    let mut id = [0u8; 3];
    for (i, b) in id.iter_mut().enumerate() {
        *b = u8::from_str_radix(value.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(JedecId(id))
}

/// Split an image into record payloads
pub fn records(image: &[u8]) -> core::slice::Chunks<'_, u8> {
    image.chunks(RECORD_SIZE)
}

/// The `<len>\r\n` line that announces a record
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    buf: [u8; 24],
    len: usize,
}

impl RecordHeader {
    pub fn new(length: usize) -> Self {
        let mut header = Self {
            buf: [0; 24],
            len: 0,
        };
        // 20 digits plus the terminator always fit
        let _ = write!(header, "{}\r\n", length);
        header
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl Write for RecordHeader {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        if end > self.buf.len() {
            return Err(fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}
