/// Opcodes of the single-line 25-series command set used by the driver
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Command {
    ProgramPage = 0x02,
    Read = 0x03,
    ReadStatus = 0x05,
    WriteEnable = 0x06,
    SectorErase = 0x20,
    EnterQuad = 0x35,
    ReadIdentification = 0x9F,

    /// Clocked out while the response phase of a command is read
    Dummy = 0xFF,
}

impl Command {
    /// Opcode followed by a 24 bit big-endian address
    pub(crate) fn with_address(self, addr: u32) -> [u8; 4] {
        [self as u8, (addr >> 16) as u8, (addr >> 8) as u8, addr as u8]
    }
}
