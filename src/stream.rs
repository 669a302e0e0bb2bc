//! The `flash_prog` streaming protocol.
//!
//! The host sends records made of a decimal length line followed by that many raw bytes. Each
//! record is written at the running address: the sectors it touches are erased as soon as the
//! length is known (while the payload is still in flight), the payload is programmed page by
//! page and optionally read back. The running address is reported after every record:
//!
//! ```text
//! flash_prog=1000      <- start address, before the first record
//! flash_prog=1004      <- after each record
//! flash_prog=ok        <- on a zero length record or end of input
//! ```

use core::{
    fmt,
    ops::{Deref, DerefMut},
};

use embedded_hal::{delay::DelayNs, digital::OutputPin};

use crate::{
    address::covered_sectors,
    blocking::SpiFlash,
    dma::{BulkEngine, DmaChannel},
    error::StreamError,
    pio::StateMachine,
};

/// Default keyboard interrupt character of the control channel
pub const CTRL_C: u8 = 0x03;

/// Longest length line accepted, terminator included
const LINE_CAPACITY: usize = 24;

/// The line-oriented control channel
pub trait Console {
    type Error;

    /// Read one line, terminator included, into `buf`. Returns 0 at end of input.
    fn read_line(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Read up to `buf.len()` raw bytes. Returns 0 at end of input.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write formatted text. Lets `write!` and `writeln!` target the console.
    fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<(), Self::Error>;

    /// Choose the byte that raises a keyboard interrupt, `None` to deliver every byte as data.
    fn set_interrupt_char(&mut self, ch: Option<u8>);
}

/// Keeps keyboard interrupts off while alive and puts [`CTRL_C`] back when dropped, on every
/// exit path.
pub struct InterruptGuard<'a, C: Console> {
    console: &'a mut C,
}

impl<'a, C: Console> InterruptGuard<'a, C> {
    pub fn new(console: &'a mut C) -> Self {
        console.set_interrupt_char(None);
        Self { console }
    }
}

impl<C: Console> Drop for InterruptGuard<'_, C> {
    fn drop(&mut self) {
        self.console.set_interrupt_char(Some(CTRL_C));
    }
}

impl<C: Console> Deref for InterruptGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.console
    }
}

impl<C: Console> DerefMut for InterruptGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.console
    }
}

/// Settings of a programming session
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramOptions {
    /// Read every record back and compare it with what was sent
    pub verify: bool,
}

impl Default for ProgramOptions {
    fn default() -> Self {
        Self { verify: true }
    }
}

/// Print the JEDEC id as `tt.flash_id=<hex>`.
pub fn report_id<const SIZE: u32, SM, CH, CS, D, E, C>(
    flash: &mut SpiFlash<SIZE, SM, CH, CS, D>,
    console: &mut C,
) -> Result<(), StreamError<E, C::Error>>
where
    SM: StateMachine,
    CH: DmaChannel,
    CS: OutputPin<Error = E>,
    D: DelayNs,
    C: Console,
{
    let id = flash.identify()?;
    writeln!(console, "tt.flash_id={}", id).map_err(StreamError::Console)
}

/// Program the record stream read from `console` starting at `start`.
///
/// `buf` receives each payload, records longer than it are rejected. Returns the address after
/// the last record. Any error aborts the session, records already reported stay written.
pub fn program_sectors<const SIZE: u32, SM, CH, CS, D, E, C>(
    flash: &mut SpiFlash<SIZE, SM, CH, CS, D>,
    console: &mut C,
    start: u32,
    buf: &mut [u8],
    options: ProgramOptions,
) -> Result<u32, StreamError<E, C::Error>>
where
    SM: StateMachine,
    CH: DmaChannel,
    CS: OutputPin<Error = E>,
    D: DelayNs,
    C: Console,
{
    let mut addr = start;
    {
        let mut console = InterruptGuard::new(console);
        writeln!(console, "flash_prog={:X}", addr).map_err(StreamError::Console)?;

        let mut line = [0u8; LINE_CAPACITY];
        loop {
            let n = console.read_line(&mut line).map_err(StreamError::Console)?;
            if n == 0 {
                break;
            }
            let length = parse_length(&line[..n]).ok_or(StreamError::InvalidLength)?;
            if length == 0 {
                break;
            }
            if length > buf.len() {
                return Err(StreamError::ChunkTooLarge {
                    length,
                    capacity: buf.len(),
                });
            }
            let next = u32::try_from(length)
                .ok()
                .and_then(|len| addr.checked_add(len))
                .ok_or(StreamError::AddressOverflow {
                    address: addr,
                    length,
                })?;

            // The chip erases while the payload is still arriving
            for sector in covered_sectors(addr, length) {
                flash.erase_sector(sector)?;
            }

            let chunk = &mut buf[..length];
            read_exact::<E, C>(&mut *console, chunk)?;
            flash.program(addr, chunk)?;
            if options.verify {
                flash.verify(addr, chunk)?;
            }

            addr = next;
            info!("programmed {=usize} bytes, now at {=u32:#x}", length, addr);
            writeln!(console, "flash_prog={:X}", addr).map_err(StreamError::Console)?;
        }
    }
    writeln!(console, "flash_prog=ok").map_err(StreamError::Console)?;
    Ok(addr)
}

/// Warn the host, then switch the chip to quad mode. The chip needs a power cycle before it
/// can be programmed again, so the driver is consumed.
pub fn switch_to_quad<const SIZE: u32, SM, CH, CS, D, E, C>(
    flash: SpiFlash<SIZE, SM, CH, CS, D>,
    console: &mut C,
) -> Result<(BulkEngine<SM, CH>, CS, D), StreamError<E, C::Error>>
where
    SM: StateMachine,
    CH: DmaChannel,
    CS: OutputPin<Error = E>,
    D: DelayNs,
    C: Console,
{
    writeln!(console, "<< switching to QPI: power cycle to flash again >>")
        .map_err(StreamError::Console)?;
    Ok(flash.enter_quad_mode()?)
}

fn read_exact<E, C: Console>(console: &mut C, buf: &mut [u8]) -> Result<(), StreamError<E, C::Error>> {
    let mut received = 0;
    while received < buf.len() {
        let n = console
            .read(&mut buf[received..])
            .map_err(StreamError::Console)?;
        if n == 0 {
            return Err(StreamError::Truncated {
                expected: buf.len(),
                received,
            });
        }
        received += n;
    }
    Ok(())
}

/// Decimal byte count of a length line, surrounding whitespace ignored
fn parse_length(line: &[u8]) -> Option<usize> {
    core::str::from_utf8(line).ok()?.trim().parse().ok()
}
