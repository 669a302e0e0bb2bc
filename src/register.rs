use bit::BitIndex;
use core::fmt;

/// Status register 1 of a 25-series chip
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRegister {
    pub status_register_protect: bool,
    pub top_bottom_protect: bool,
    pub protected_block: u8,
    pub write_enable_latch: bool,
    pub wip_bit: bool,
}

impl From<u8> for StatusRegister {
    fn from(val: u8) -> StatusRegister {
        StatusRegister {
            status_register_protect: val.bit(7),
            top_bottom_protect: val.bit(5),
            protected_block: val.bit_range(2..5),
            write_enable_latch: val.bit(1),
            wip_bit: val.bit(0),
        }
    }
}

impl StatusRegister {
    /// A write or erase is still running
    pub fn is_busy(&self) -> bool {
        self.wip_bit
    }
}

pub struct ManufacturerId(pub u8);
pub struct MemoryType(pub u8);
pub struct MemoryDensity(pub u8);

/// Response to the JEDEC read identification command
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JedecId(pub [u8; 3]);

impl JedecId {
    pub fn manufacturer(&self) -> ManufacturerId {
        ManufacturerId(self.0[0])
    }

    pub fn memory_type(&self) -> MemoryType {
        MemoryType(self.0[1])
    }

    pub fn density(&self) -> MemoryDensity {
        MemoryDensity(self.0[2])
    }

    /// Capacity in bytes, when the density byte follows the usual `2^n` encoding
    pub fn capacity(&self) -> Option<usize> {
        match self.0[2] {
            n @ 0x10..=0x1F => Some(1 << n),
            _ => None,
        }
    }
}

/// Lowercase hex, as reported on the control channel
impl fmt::Display for JedecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
