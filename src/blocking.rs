use crate::{
    address::{page_bursts, PAGE_SIZE, SECTOR_SIZE},
    command::Command,
    dma::{BulkEngine, DmaChannel},
    error::Error,
    pio::{EngineConfig, SerialEngine, StateMachine},
    register::{JedecId, StatusRegister},
};
use embedded_hal::{delay::DelayNs, digital::OutputPin};

/// Status polls allowed by default before a wait gives up
pub const DEFAULT_BUSY_BUDGET: u32 = 10_000;

/// Type alias for the W25Q16 (2MB)
pub type W25Q16<SM, CH, CS, D> = SpiFlash<0x20_0000, SM, CH, CS, D>;

/// Type alias for the W25Q32 (4MB)
pub type W25Q32<SM, CH, CS, D> = SpiFlash<0x40_0000, SM, CH, CS, D>;

/// Type alias for the W25Q64 (8MB)
pub type W25Q64<SM, CH, CS, D> = SpiFlash<0x80_0000, SM, CH, CS, D>;

/// Type alias for the W25Q128 (16MB)
pub type W25Q128<SM, CH, CS, D> = SpiFlash<0x100_0000, SM, CH, CS, D>;

/// Blocking driver for a 25-series NOR flash of `SIZE` bytes.
///
/// Owns the bulk engine, the chip select line and the delay used between status polls. Every
/// erase, program and read first waits for the chip to report idle.
pub struct SpiFlash<const SIZE: u32, SM, CH, CS, D> {
    bus: BulkEngine<SM, CH>,
    cs: CS,
    delay: D,
    busy_budget: u32,
}

impl<const SIZE: u32, SM, CH, CS, D, E> SpiFlash<SIZE, SM, CH, CS, D>
where
    SM: StateMachine,
    CH: DmaChannel,
    CS: OutputPin<Error = E>,
    D: DelayNs,
{
    pub const fn capacity() -> usize {
        SIZE as usize
    }

    /// Create a new instance, releasing the chip select line.
    pub fn new(bus: BulkEngine<SM, CH>, mut cs: CS, delay: D) -> Result<Self, Error<E>> {
        cs.set_high().map_err(Error::Pin)?;
        Ok(Self {
            bus,
            cs,
            delay,
            busy_budget: DEFAULT_BUSY_BUDGET,
        })
    }

    /// Build the whole stack from its parts: the serial engine on `sm`, the bulk engine on the
    /// two channels and the driver on top.
    pub fn setup(
        sm: SM,
        config: EngineConfig,
        feed: CH,
        drain: CH,
        cs: CS,
        delay: D,
    ) -> Result<Self, Error<E>> {
        let serial = SerialEngine::new(sm, config)?;
        Self::new(BulkEngine::new(serial, feed, drain), cs, delay)
    }

    /// Use `budget` status polls for the waits done inside erase, program and read.
    pub fn with_busy_budget(mut self, budget: u32) -> Self {
        self.busy_budget = budget;
        self
    }

    pub fn busy_budget(&self) -> u32 {
        self.busy_budget
    }

    /// Run `body` with chip select asserted. The line is released before returning, unless
    /// `body` panics.
    pub fn with_selection<R>(
        &mut self,
        body: impl FnOnce(&mut BulkEngine<SM, CH>) -> R,
    ) -> Result<R, Error<E>> {
        self.cs.set_low().map_err(Error::Pin)?;
        let res = body(&mut self.bus);
        self.cs.set_high().map_err(Error::Pin)?;
        Ok(res)
    }

    /// Read the status register
    pub fn read_status(&mut self) -> Result<StatusRegister, Error<E>> {
        let command = [Command::ReadStatus as u8, Command::Dummy as u8];
        let mut response = [0u8; 2];
        self.with_selection(|bus| bus.write_read(&command, &mut response))?;
        Ok(response[1].into())
    }

    /// Poll the status register until the write in progress bit clears.
    ///
    /// Each poll spends one unit of `budget` and is followed by a 1µs sleep while the chip is
    /// busy. A budget of 0 fails without reading the status.
    pub fn wait_not_busy(&mut self, budget: u32) -> Result<(), Error<E>> {
        let mut remaining = budget;
        loop {
            if remaining == 0 {
                warn!("flash still busy after {=u32} polls", budget);
                return Err(Error::Timeout);
            }
            remaining -= 1;
            if !self.read_status()?.is_busy() {
                return Ok(());
            }
            self.delay.delay_us(1);
        }
    }

    fn wait_idle(&mut self) -> Result<(), Error<E>> {
        let budget = self.busy_budget;
        self.wait_not_busy(budget)
    }

    /// Read the JEDEC identification of the device
    pub fn identify(&mut self) -> Result<JedecId, Error<E>> {
        self.wait_idle()?;
        let mut id = [0u8; 3];
        self.with_selection(|bus| {
            bus.transfer_byte(Command::ReadIdentification as u8);
            bus.read_into(&mut id, 0x00);
        })?;
        debug!("flash id {=[u8]:x}", &id[..]);
        Ok(JedecId(id))
    }

    /// Set the write enable latch. The chip clears it after every erase or program.
    pub fn write_enable(&mut self) -> Result<(), Error<E>> {
        self.wait_idle()?;
        self.with_selection(|bus| {
            bus.transfer_byte(Command::WriteEnable as u8);
        })
    }

    /// Erase the 4kB sector starting at `addr`, which must be sector aligned.
    pub fn erase_sector(&mut self, addr: u32) -> Result<(), Error<E>> {
        self.wait_idle()?;
        self.write_enable()?;
        debug!("erase sector {=u32:#x}", addr);
        let command = Command::SectorErase.with_address(addr);
        self.with_selection(|bus| bus.write(&command))
    }

    /// Program `data` at `addr`. The whole write must stay inside one page, the chip wraps
    /// around to the start of the page otherwise.
    pub fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<E>> {
        self.wait_idle()?;
        self.write_enable()?;
        trace!("program {=usize} bytes at {=u32:#x}", data.len(), addr);
        let command = Command::ProgramPage.with_address(addr);
        self.with_selection(|bus| {
            bus.write(&command);
            bus.write(data);
        })
    }

    /// Program `data` at `addr`, split into writes that never cross a page boundary.
    pub fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<E>> {
        for burst in page_bursts(addr, data.len()) {
            self.program_page(burst.address, &data[burst.range()])?;
        }
        Ok(())
    }

    /// Read `buff.len()` bytes starting at `addr`
    pub fn read_data(&mut self, addr: u32, buff: &mut [u8]) -> Result<(), Error<E>> {
        self.wait_idle()?;
        let command = Command::Read.with_address(addr);
        self.with_selection(|bus| {
            bus.write(&command);
            bus.read_into(buff, 0x00);
        })
    }

    /// Read back `data.len()` bytes at `addr` and compare with `data`.
    pub fn verify(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<E>> {
        let mut readback = [0u8; PAGE_SIZE as usize];
        for (i, expected) in data.chunks(readback.len()).enumerate() {
            let at = addr + (i * readback.len()) as u32;
            let got = &mut readback[..expected.len()];
            self.read_data(at, got)?;
            if let Some(pos) = got.iter().zip(expected).position(|(a, b)| a != b) {
                let address = at + pos as u32;
                warn!("verification failed at {=u32:#x}", address);
                return Err(Error::VerificationFailed { address });
            }
        }
        Ok(())
    }

    /// Switch the chip to quad mode. It only talks single line SPI again after a power cycle,
    /// so the driver is consumed and its parts handed back.
    pub fn enter_quad_mode(mut self) -> Result<(BulkEngine<SM, CH>, CS, D), Error<E>> {
        self.wait_idle()?;
        info!("entering quad mode");
        self.with_selection(|bus| {
            bus.transfer_byte(Command::EnterQuad as u8);
        })?;
        Ok(self.release())
    }

    /// Give back the bulk engine, the chip select pin and the delay
    pub fn release(self) -> (BulkEngine<SM, CH>, CS, D) {
        (self.bus, self.cs, self.delay)
    }
}

/// Implementation of the `NorFlash` traits of the `embedded_storage` crate.
mod es {
    use super::*;
    use core::fmt::Debug;
    use embedded_storage::nor_flash::{
        check_erase, check_read, check_write, ErrorType, MultiwriteNorFlash, NorFlash,
        NorFlashError, NorFlashErrorKind, ReadNorFlash,
    };

    impl<E> From<NorFlashErrorKind> for Error<E> {
        fn from(e: NorFlashErrorKind) -> Self {
            match e {
                NorFlashErrorKind::NotAligned => Error::NotAligned,
                _ => Error::OutOfBounds,
            }
        }
    }

    impl<E> NorFlashError for Error<E>
    where
        E: Debug,
    {
        fn kind(&self) -> NorFlashErrorKind {
            match self {
                Error::OutOfBounds => NorFlashErrorKind::OutOfBounds,
                Error::NotAligned => NorFlashErrorKind::NotAligned,
                _ => NorFlashErrorKind::Other,
            }
        }
    }

    impl<const SIZE: u32, SM, CH, CS, D, E> ErrorType for SpiFlash<SIZE, SM, CH, CS, D>
    where
        CS: OutputPin<Error = E>,
        E: Debug,
    {
        type Error = Error<E>;
    }

    impl<const SIZE: u32, SM, CH, CS, D, E> ReadNorFlash for SpiFlash<SIZE, SM, CH, CS, D>
    where
        SM: StateMachine,
        CH: DmaChannel,
        CS: OutputPin<Error = E>,
        D: DelayNs,
        E: Debug,
    {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            check_read(self, offset, bytes.len())?;
            self.read_data(offset, bytes)
        }

        fn capacity(&self) -> usize {
            SIZE as usize
        }
    }

    impl<const SIZE: u32, SM, CH, CS, D, E> NorFlash for SpiFlash<SIZE, SM, CH, CS, D>
    where
        SM: StateMachine,
        CH: DmaChannel,
        CS: OutputPin<Error = E>,
        D: DelayNs,
        E: Debug,
    {
        const WRITE_SIZE: usize = 1;
        const ERASE_SIZE: usize = SECTOR_SIZE as usize;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            check_erase(self, from, to)?;
            for sector in (from..to).step_by(SECTOR_SIZE as usize) {
                self.erase_sector(sector)?;
            }
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            check_write(self, offset, bytes.len())?;
            self.program(offset, bytes)
        }
    }

    impl<const SIZE: u32, SM, CH, CS, D, E> MultiwriteNorFlash for SpiFlash<SIZE, SM, CH, CS, D>
    where
        SM: StateMachine,
        CH: DmaChannel,
        CS: OutputPin<Error = E>,
        D: DelayNs,
        E: Debug,
    {
    }
}
