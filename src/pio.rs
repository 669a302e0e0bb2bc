//! Serial engine: SPI mode 0 and mode 1 emulated by a PIO state machine.
//!
//! Each program shifts one bit out on MOSI and samples one bit from MISO per SPI clock, with
//! SCK driven through side-set. Both programs shift MSB first with autopull and autopush at 8
//! bits, so the TX and RX queues carry one byte per word.

use crate::error::UnsupportedConfiguration;

/// Clock phase of the emulated bus
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Sample on the leading edge (mode 0)
    #[default]
    Zero,
    /// Sample on the trailing edge (mode 1)
    One,
}

/// Idle level of the clock line
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    #[default]
    IdleLow,
    /// Not supported by either program
    IdleHigh,
}

/// GPIO numbers of the bus
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiPins {
    pub mosi: u8,
    pub miso: u8,
    pub sck: u8,
}

/// Bus configuration, fixed once the engine is built
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub phase: Phase,
    pub polarity: Polarity,
    /// SPI clock in Hz
    pub frequency: u32,
    pub pins: SpiPins,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            phase: Phase::Zero,
            polarity: Polarity::IdleLow,
            frequency: 10_000_000,
            pins: SpiPins {
                mosi: 1,
                miso: 2,
                sck: 3,
            },
        }
    }
}

/// Shift and FIFO setup shared by the SPI programs
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftConfig {
    /// Shift towards the MSB, so the first bit on the wire is bit 31 of the OSR
    pub shift_left: bool,
    pub autopull: bool,
    pub pull_threshold: u8,
    pub autopush: bool,
    pub push_threshold: u8,
}

/// An assembled PIO program with the settings it depends on
#[derive(Debug, PartialEq, Eq)]
pub struct PioProgram {
    pub code: &'static [u16],
    /// Number of side-set bits, none of them optional
    pub side_set_bits: u8,
    pub wrap_source: u8,
    pub wrap_target: u8,
    pub shift: ShiftConfig,
}

const SPI_SHIFT: ShiftConfig = ShiftConfig {
    shift_left: true,
    autopull: true,
    pull_threshold: 8,
    autopush: true,
    push_threshold: 8,
};

// out pins, 1   side 0
// in  pins, 1   side 1
const CPHA0_CODE: [u16; 2] = [0x6001, 0x5001];

// pull ifempty  side 0
// out pins, 1   side 1 [1]
// in  pins, 1   side 0
const CPHA1_CODE: [u16; 3] = [0x80E0, 0x7101, 0x4001];

static CPHA0: PioProgram = PioProgram {
    code: &CPHA0_CODE,
    side_set_bits: 1,
    wrap_source: 1,
    wrap_target: 0,
    shift: SPI_SHIFT,
};

static CPHA1: PioProgram = PioProgram {
    code: &CPHA1_CODE,
    side_set_bits: 1,
    wrap_source: 2,
    wrap_target: 0,
    shift: SPI_SHIFT,
};

/// The two fixed SPI programs
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiProgram {
    Cpha0,
    Cpha1,
}

impl SpiProgram {
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Zero => SpiProgram::Cpha0,
            Phase::One => SpiProgram::Cpha1,
        }
    }

    pub fn program(self) -> &'static PioProgram {
        match self {
            SpiProgram::Cpha0 => &CPHA0,
            SpiProgram::Cpha1 => &CPHA1,
        }
    }

    /// State machine cycles per SPI clock
    pub fn clock_multiplier(self) -> u32 {
        match self {
            SpiProgram::Cpha0 => 2,
            SpiProgram::Cpha1 => 4,
        }
    }
}

/// A PIO state machine the engine can drive.
///
/// `push` and `pull` block on a full TX FIFO and an empty RX FIFO respectively.
pub trait StateMachine {
    /// Index of the state machine inside PIO0
    fn index(&self) -> u8;

    /// Load `program`, map the pins, drive MOSI and SCK low and set the clock to `clock_hz`.
    /// The machine is left stopped.
    ///
    /// [`clock_divider`] turns `clock_hz` into the divider register value for a given system
    /// clock.
    fn install(&mut self, program: &'static PioProgram, pins: SpiPins, clock_hz: u32);

    fn set_enabled(&mut self, enabled: bool);

    fn push(&mut self, word: u32);

    fn pull(&mut self) -> u32;
}

/// Pacing signal number of a DMA transfer
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dreq(pub u8);

impl Dreq {
    pub fn pio0_tx(sm: u8) -> Dreq {
        Dreq(sm)
    }

    pub fn pio0_rx(sm: u8) -> Dreq {
        Dreq(sm + 4)
    }
}

/// The serial engine, owning its state machine
pub struct SerialEngine<SM> {
    sm: SM,
    config: EngineConfig,
    program: SpiProgram,
    active: bool,
}

impl<SM> SerialEngine<SM>
where
    SM: StateMachine,
{
    /// Install the program matching `config.phase`. Fails before touching the state machine if
    /// the configuration cannot be emulated.
    pub fn new(mut sm: SM, config: EngineConfig) -> Result<Self, UnsupportedConfiguration> {
        if config.polarity != Polarity::IdleLow || config.frequency == 0 {
            return Err(UnsupportedConfiguration);
        }
        let program = SpiProgram::for_phase(config.phase);
        let clock_hz = config
            .frequency
            .checked_mul(program.clock_multiplier())
            .ok_or(UnsupportedConfiguration)?;
        sm.install(program.program(), config.pins, clock_hz);
        Ok(Self {
            sm,
            config,
            program,
            active: false,
        })
    }

    /// Start the state machine. It is never stopped again.
    pub fn activate(&mut self) {
        if !self.active {
            info!(
                "serial engine: {} at {} Hz",
                self.program,
                self.clock_hz()
            );
            self.sm.set_enabled(true);
            self.active = true;
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Exchange a single byte through the queues.
    pub fn transfer_byte(&mut self, byte: u8) -> u8 {
        self.sm.push((byte as u32) << 24);
        self.sm.pull() as u8
    }

    pub fn tx_dreq(&self) -> Dreq {
        Dreq::pio0_tx(self.sm.index())
    }

    pub fn rx_dreq(&self) -> Dreq {
        Dreq::pio0_rx(self.sm.index())
    }

    pub fn index(&self) -> u8 {
        self.sm.index()
    }

    /// State machine clock, a multiple of the SPI clock
    pub fn clock_hz(&self) -> u32 {
        self.config.frequency * self.program.clock_multiplier()
    }

    pub fn program(&self) -> SpiProgram {
        self.program
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Give back the state machine
    pub fn release(self) -> SM {
        self.sm
    }
}

/// 16.8 fixed point clock divider that gets `sys_hz` down to `target_hz`.
///
/// Clamped to the hardware range `1.0..=65536.0` (an integer part of 0 means 65536).
pub fn clock_divider(sys_hz: u32, target_hz: u32) -> (u16, u8) {
    if target_hz == 0 {
        return (0, 0);
    }
    let div = ((sys_hz as u64) << 8) / target_hz as u64;
    if div < 1 << 8 {
        return (1, 0);
    }
    if div >= 1 << 24 {
        return (0, 0);
    }
    ((div >> 8) as u16, div as u8)
}
