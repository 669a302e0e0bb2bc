//! Bulk transfer engine: a feeder and a drainer DMA channel paced by the serial engine.
//!
//! The bus is full duplex and byte synchronous, so every byte pushed into the TX queue
//! produces exactly one byte in the RX queue. Both channels are therefore always armed
//! together with the same count, and the pair is only reachable through the transfer
//! methods of [`BulkEngine`].

use crate::pio::{Dreq, SerialEngine, StateMachine};

/// Where a channel reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFrom {
    /// Memory, advancing after every byte when `increment` is set
    Memory { ptr: *const u8, increment: bool },
    /// RX queue of a PIO0 state machine
    RxFifo { sm: u8 },
}

/// Where a channel writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTo {
    /// Memory, advancing after every byte when `increment` is set
    Memory { ptr: *mut u8, increment: bool },
    /// TX queue of a PIO0 state machine
    TxFifo { sm: u8 },
}

/// A byte-wide transfer of `count` elements paced by `treq`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    pub read: ReadFrom,
    pub write: WriteTo,
    pub count: u32,
    pub treq: Dreq,
}

/// One DMA channel
pub trait DmaChannel {
    /// Program the channel and trigger it.
    ///
    /// # Safety
    ///
    /// Memory referenced by `config` must stay valid, and must not be accessed by anything
    /// else, until [`is_active`](DmaChannel::is_active) returns false.
    unsafe fn start(&mut self, config: TransferConfig);

    fn is_active(&self) -> bool;
}

/// The serial engine together with its two channels
pub struct BulkEngine<SM, CH> {
    serial: SerialEngine<SM>,
    feed: CH,
    drain: CH,
}

impl<SM, CH> BulkEngine<SM, CH>
where
    SM: StateMachine,
    CH: DmaChannel,
{
    /// Take ownership of an activated engine and two idle channels.
    pub fn new(mut serial: SerialEngine<SM>, feed: CH, drain: CH) -> Self {
        serial.activate();
        Self {
            serial,
            feed,
            drain,
        }
    }

    /// Clock out `data`, discarding what comes back.
    pub fn write(&mut self, data: &[u8]) {
        let mut sink = 0u8;
        self.run(
            ReadFrom::Memory {
                ptr: data.as_ptr(),
                increment: true,
            },
            WriteTo::Memory {
                ptr: &mut sink,
                increment: false,
            },
            data.len(),
        );
    }

    /// Fill `buf` from the bus while repeating `fill` on MOSI.
    pub fn read_into(&mut self, buf: &mut [u8], fill: u8) {
        let len = buf.len();
        self.run(
            ReadFrom::Memory {
                ptr: &fill,
                increment: false,
            },
            WriteTo::Memory {
                ptr: buf.as_mut_ptr(),
                increment: true,
            },
            len,
        );
    }

    /// Full duplex exchange: `read[i]` is the byte clocked in while `write[i]` was clocked out.
    ///
    /// Panics if the two slices differ in length.
    pub fn write_read(&mut self, write: &[u8], read: &mut [u8]) {
        assert_eq!(write.len(), read.len(), "full duplex transfer length mismatch");
        self.run(
            ReadFrom::Memory {
                ptr: write.as_ptr(),
                increment: true,
            },
            WriteTo::Memory {
                ptr: read.as_mut_ptr(),
                increment: true,
            },
            write.len(),
        );
    }

    /// Exchange one byte through the queues without the channels.
    pub fn transfer_byte(&mut self, byte: u8) -> u8 {
        self.serial.transfer_byte(byte)
    }

    pub fn serial(&self) -> &SerialEngine<SM> {
        &self.serial
    }

    /// Give back the engine and the channels
    pub fn release(self) -> (SerialEngine<SM>, CH, CH) {
        (self.serial, self.feed, self.drain)
    }

    fn run(&mut self, source: ReadFrom, sink: WriteTo, count: usize) {
        if count == 0 {
            return;
        }
        trace!("dma: {=usize} bytes", count);
        let sm = self.serial.index();
        let count = count as u32;
        let drain = TransferConfig {
            read: ReadFrom::RxFifo { sm },
            write: sink,
            count,
            treq: self.serial.rx_dreq(),
        };
        let feed = TransferConfig {
            read: source,
            write: WriteTo::TxFifo { sm },
            count,
            treq: self.serial.tx_dreq(),
        };
        // SAFETY: `source` and `sink` point into buffers borrowed by the caller for the whole
        // call, and we do not return before the drain channel is idle. The drain channel goes
        // idle last since it consumes one byte for each byte the feed channel produces.
        unsafe {
            self.drain.start(drain);
            self.feed.start(feed);
        }
        while self.drain.is_active() {
            core::hint::spin_loop();
        }
    }
}
