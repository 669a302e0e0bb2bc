/// All possible errors emitted by the driver
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<PinError> {
    /// The chip select pin could not be driven
    Pin(PinError),

    /// The chip kept reporting write in progress for the whole poll budget
    Timeout,

    /// Read back data differs from what was written, at this address
    VerificationFailed { address: u32 },

    /// The serial engine cannot run the requested bus configuration
    UnsupportedConfiguration,

    /// Address out of bound
    OutOfBounds,

    /// Address not aligned
    NotAligned,
}

/// Errors of the streaming programmer
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError<PinError, ConsoleError> {
    /// A flash operation failed
    Flash(Error<PinError>),

    /// The control channel failed
    Console(ConsoleError),

    /// A length line was not a decimal byte count
    InvalidLength,

    /// A record does not fit the receive buffer. Nothing was erased for it.
    ChunkTooLarge { length: usize, capacity: usize },

    /// A record would run past the end of the 32 bit address space. Nothing was erased for it.
    AddressOverflow { address: u32, length: usize },

    /// Input ended in the middle of a payload
    Truncated { expected: usize, received: usize },
}

impl<P, C> From<Error<P>> for StreamError<P, C> {
    fn from(e: Error<P>) -> Self {
        StreamError::Flash(e)
    }
}

/// The serial engine cannot run the requested bus configuration
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsupportedConfiguration;

impl<P> From<UnsupportedConfiguration> for Error<P> {
    fn from(_: UnsupportedConfiguration) -> Self {
        Error::UnsupportedConfiguration
    }
}
