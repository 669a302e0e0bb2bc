//! An emulated board: a PIO state machine, two DMA channels and a chip select pin sharing one
//! SPI bus, with a device model on the other end.
#![allow(dead_code)]

use std::{cell::RefCell, collections::VecDeque, convert::Infallible, fmt, rc::Rc};

use embedded_hal::{delay::DelayNs, digital::ErrorType, digital::OutputPin};
use tt_flash::{
    blocking::SpiFlash,
    dma::{BulkEngine, DmaChannel, ReadFrom, TransferConfig, WriteTo},
    pio::{Dreq, EngineConfig, PioProgram, SerialEngine, SpiPins, StateMachine},
    stream::Console,
};

/// Something on the far end of the bus
pub trait Device {
    fn select(&mut self) {}
    fn exchange(&mut self, mosi: u8) -> u8;
    fn deselect(&mut self) {}
}

/// Answers every byte with the previous one, like a shift register between MOSI and MISO
#[derive(Default)]
pub struct Echo {
    last: Option<u8>,
}

impl Device for Echo {
    fn exchange(&mut self, mosi: u8) -> u8 {
        self.last.replace(mosi).unwrap_or(0xFF)
    }
}

/// One completed DMA transfer pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRecord {
    pub count: u32,
    pub feed_treq: Dreq,
    pub drain_treq: Dreq,
    pub selected: bool,
}

pub struct Bus<D> {
    pub device: D,
    pub installed: Option<(&'static PioProgram, SpiPins, u32)>,
    pub enabled: bool,
    pub selected: bool,
    pub frames: usize,
    pub transfers: Vec<TransferRecord>,
    rx: VecDeque<u8>,
    feed: Option<TransferConfig>,
    drain: Option<TransferConfig>,
}

impl<D: Device> Bus<D> {
    fn new(device: D) -> Self {
        Self {
            device,
            installed: None,
            enabled: false,
            selected: false,
            frames: 0,
            transfers: Vec::new(),
            rx: VecDeque::new(),
            feed: None,
            drain: None,
        }
    }

    fn run_pending(&mut self) {
        let drain = match self.drain.take() {
            Some(drain) => drain,
            None => return,
        };
        let feed = self.feed.take().expect("drain channel armed without a feed channel");
        assert_eq!(feed.count, drain.count, "channel counts differ");
        assert!(self.enabled, "state machine never started, transfer would hang");

        for i in 0..feed.count as usize {
            let out = match feed.read {
                ReadFrom::Memory { ptr, increment } => unsafe {
                    *ptr.add(if increment { i } else { 0 })
                },
                ReadFrom::RxFifo { .. } => panic!("feed channel reads from the RX queue"),
            };
            let answer = self.device.exchange(out);
            match drain.write {
                WriteTo::Memory { ptr, increment } => unsafe {
                    *ptr.add(if increment { i } else { 0 }) = answer;
                },
                WriteTo::TxFifo { .. } => panic!("drain channel writes to the TX queue"),
            }
        }
        self.transfers.push(TransferRecord {
            count: feed.count,
            feed_treq: feed.treq,
            drain_treq: drain.treq,
            selected: self.selected,
        });
    }
}

pub type Shared<D> = Rc<RefCell<Bus<D>>>;

pub struct FakeStateMachine<D> {
    index: u8,
    bus: Shared<D>,
}

impl<D: Device> StateMachine for FakeStateMachine<D> {
    fn index(&self) -> u8 {
        self.index
    }

    fn install(&mut self, program: &'static PioProgram, pins: SpiPins, clock_hz: u32) {
        self.bus.borrow_mut().installed = Some((program, pins, clock_hz));
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.bus.borrow_mut().enabled = enabled;
    }

    fn push(&mut self, word: u32) {
        let mut bus = self.bus.borrow_mut();
        assert!(bus.enabled, "push to a stopped state machine");
        let answer = bus.device.exchange((word >> 24) as u8);
        bus.rx.push_back(answer);
    }

    fn pull(&mut self) -> u32 {
        self.bus
            .borrow_mut()
            .rx
            .pop_front()
            .expect("pull from an empty RX queue") as u32
    }
}

pub struct FakeChannel<D> {
    bus: Shared<D>,
}

impl<D: Device> DmaChannel for FakeChannel<D> {
    unsafe fn start(&mut self, config: TransferConfig) {
        let mut bus = self.bus.borrow_mut();
        match (config.read, config.write) {
            (_, WriteTo::TxFifo { .. }) => {
                assert!(bus.feed.is_none(), "feed channel restarted while busy");
                bus.feed = Some(config);
            }
            (ReadFrom::RxFifo { .. }, _) => {
                assert!(bus.drain.is_none(), "drain channel restarted while busy");
                bus.drain = Some(config);
            }
            _ => panic!("memory to memory transfer"),
        }
    }

    fn is_active(&self) -> bool {
        self.bus.borrow_mut().run_pending();
        false
    }
}

pub struct FakeCs<D> {
    bus: Shared<D>,
}

impl<D> ErrorType for FakeCs<D> {
    type Error = Infallible;
}

impl<D: Device> OutputPin for FakeCs<D> {
    fn set_low(&mut self) -> Result<(), Infallible> {
        let mut bus = self.bus.borrow_mut();
        assert!(!bus.selected, "chip select asserted twice");
        bus.selected = true;
        bus.frames += 1;
        bus.device.select();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut bus = self.bus.borrow_mut();
        if bus.selected {
            bus.selected = false;
            bus.device.deselect();
        }
        Ok(())
    }
}

pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

pub fn bulk_engine<D: Device>(
    device: D,
    config: EngineConfig,
) -> (BulkEngine<FakeStateMachine<D>, FakeChannel<D>>, Shared<D>) {
    let bus = Rc::new(RefCell::new(Bus::new(device)));
    let sm = FakeStateMachine {
        index: 0,
        bus: bus.clone(),
    };
    let serial = SerialEngine::new(sm, config).unwrap();
    let engine = BulkEngine::new(
        serial,
        FakeChannel { bus: bus.clone() },
        FakeChannel { bus: bus.clone() },
    );
    (engine, bus)
}

/// The separate pieces of a board, nothing installed or started yet
pub fn board_parts<D: Device>(
    device: D,
) -> (
    FakeStateMachine<D>,
    FakeChannel<D>,
    FakeChannel<D>,
    FakeCs<D>,
    Shared<D>,
) {
    let bus = Rc::new(RefCell::new(Bus::new(device)));
    (
        FakeStateMachine {
            index: 0,
            bus: bus.clone(),
        },
        FakeChannel { bus: bus.clone() },
        FakeChannel { bus: bus.clone() },
        FakeCs { bus: bus.clone() },
        bus,
    )
}

/// 64kB of emulated flash
pub const CHIP_SIZE: u32 = 0x10000;

pub type TestFlash = SpiFlash<
    CHIP_SIZE,
    FakeStateMachine<FlashChip>,
    FakeChannel<FlashChip>,
    FakeCs<FlashChip>,
    NoDelay,
>;

pub fn flash_board(chip: FlashChip) -> (TestFlash, Shared<FlashChip>) {
    let (engine, bus) = bulk_engine(chip, EngineConfig::default());
    let cs = FakeCs { bus: bus.clone() };
    let flash = SpiFlash::new(engine, cs, NoDelay).unwrap();
    (flash, bus)
}

/// Commands seen by the emulated chip, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    ReadStatus,
    WriteEnable,
    Identify,
    Erase(u32),
    Program(u32, Vec<u8>),
    Read(u32, usize),
    EnterQuad,
}

/// A 25-series chip: erase sets bytes to 0xFF, program can only clear bits and wraps inside
/// the page, erase and program need the write enable latch and leave the chip busy.
pub struct FlashChip {
    pub memory: Vec<u8>,
    pub id: [u8; 3],
    pub write_enable_latch: bool,
    /// Status reads left that report busy
    pub busy_polls: u32,
    /// Busy status reads after each erase or program
    pub busy_after_write: u32,
    /// Address that reads back inverted after being programmed
    pub corrupt: Option<u32>,
    pub quad: bool,
    pub log: Vec<Op>,
    frame: Vec<u8>,
}

impl FlashChip {
    pub fn new() -> Self {
        Self {
            memory: vec![0xFF; CHIP_SIZE as usize],
            id: [0xEF, 0x40, 0x16],
            write_enable_latch: false,
            busy_polls: 0,
            busy_after_write: 2,
            corrupt: None,
            quad: false,
            log: Vec::new(),
            frame: Vec::new(),
        }
    }

    fn address(&self) -> u32 {
        u32::from_be_bytes([0, self.frame[1], self.frame[2], self.frame[3]])
    }

    fn status(&self) -> u8 {
        (self.busy_polls > 0) as u8 | (self.write_enable_latch as u8) << 1
    }

    fn start_write_cycle(&mut self) {
        self.write_enable_latch = false;
        self.busy_polls = self.busy_after_write;
    }

    pub fn erases(&self) -> Vec<u32> {
        self.log
            .iter()
            .filter_map(|op| match op {
                Op::Erase(addr) => Some(*addr),
                _ => None,
            })
            .collect()
    }

    pub fn programs(&self) -> Vec<(u32, Vec<u8>)> {
        self.log
            .iter()
            .filter_map(|op| match op {
                Op::Program(addr, data) => Some((*addr, data.clone())),
                _ => None,
            })
            .collect()
    }
}

impl Device for FlashChip {
    fn select(&mut self) {
        self.frame.clear();
    }

    fn exchange(&mut self, mosi: u8) -> u8 {
        assert!(!self.quad, "single line command sent in quad mode");
        self.frame.push(mosi);
        let pos = self.frame.len() - 1;
        if pos == 0 {
            assert!(
                self.busy_polls == 0 || mosi == 0x05,
                "command {:#04x} sent while busy",
                mosi
            );
            return 0xFF;
        }
        match self.frame[0] {
            0x05 => {
                let status = self.status();
                self.busy_polls = self.busy_polls.saturating_sub(1);
                status
            }
            0x9F if pos <= 3 => self.id[pos - 1],
            0x03 if pos >= 4 => {
                let addr = self.address() as usize + pos - 4;
                self.memory[addr % self.memory.len()]
            }
            _ => 0xFF,
        }
    }

    fn deselect(&mut self) {
        let frame = std::mem::take(&mut self.frame);
        if frame.is_empty() {
            return;
        }
        self.frame = frame.clone();
        match frame[0] {
            0x05 => self.log.push(Op::ReadStatus),
            0x06 => {
                self.write_enable_latch = true;
                self.log.push(Op::WriteEnable);
            }
            0x9F => self.log.push(Op::Identify),
            0x35 => {
                self.quad = true;
                self.log.push(Op::EnterQuad);
            }
            0x20 if frame.len() == 4 => {
                let addr = self.address();
                self.log.push(Op::Erase(addr));
                if self.write_enable_latch {
                    let start = (addr & !0xFFF) as usize % self.memory.len();
                    self.memory[start..start + 0x1000].fill(0xFF);
                    self.start_write_cycle();
                }
            }
            0x02 if frame.len() >= 4 => {
                let addr = self.address();
                let data = frame[4..].to_vec();
                if self.write_enable_latch {
                    for (i, b) in data.iter().enumerate() {
                        // the column address wraps inside the page
                        let at = (addr & !0xFF) | (addr.wrapping_add(i as u32) & 0xFF);
                        let cell = &mut self.memory[at as usize % CHIP_SIZE as usize];
                        *cell &= b;
                        if self.corrupt == Some(at) {
                            *cell = !*b;
                        }
                    }
                    self.start_write_cycle();
                }
                self.log.push(Op::Program(addr, data));
            }
            0x03 if frame.len() >= 4 => {
                let addr = self.address();
                self.log.push(Op::Read(addr, frame.len() - 4));
            }
            other => panic!("unexpected command frame starting with {:#04x}", other),
        }
        self.frame.clear();
    }
}

/// A control channel fed from a byte script, collecting everything printed
pub struct ScriptedConsole {
    input: Vec<u8>,
    pos: usize,
    pub output: String,
    pub interrupt_char: Option<u8>,
    pub interrupt_changes: Vec<Option<u8>>,
}

impl ScriptedConsole {
    pub fn new(input: &[u8]) -> Self {
        Self {
            input: input.to_vec(),
            pos: 0,
            output: String::new(),
            interrupt_char: Some(0x03),
            interrupt_changes: Vec::new(),
        }
    }

    pub fn lines(&self) -> Vec<&str> {
        self.output.lines().collect()
    }

    pub fn remaining(&self) -> &[u8] {
        &self.input[self.pos..]
    }
}

impl Console for ScriptedConsole {
    type Error = fmt::Error;

    fn read_line(&mut self, buf: &mut [u8]) -> Result<usize, fmt::Error> {
        let mut n = 0;
        while n < buf.len() && self.pos < self.input.len() {
            let b = self.input[self.pos];
            buf[n] = b;
            n += 1;
            self.pos += 1;
            if b == b'\n' {
                break;
            }
        }
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, fmt::Error> {
        let n = buf.len().min(self.input.len() - self.pos);
        buf[..n].copy_from_slice(&self.input[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<(), fmt::Error> {
        fmt::Write::write_fmt(&mut self.output, args)
    }

    fn set_interrupt_char(&mut self, ch: Option<u8>) {
        self.interrupt_char = ch;
        self.interrupt_changes.push(ch);
    }
}

/// Build a record stream from payloads, terminated by a zero length record
pub fn stream(records: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for r in records {
        out.extend_from_slice(format!("{}\n", r.len()).as_bytes());
        out.extend_from_slice(r);
    }
    out.extend_from_slice(b"0\n");
    out
}
