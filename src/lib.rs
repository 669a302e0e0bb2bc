#![no_std]
//! A platform agnostic programmer for 25-series SPI NOR flash chips, built for boards where
//! the SPI bus is bit-banged by a PIO state machine and fed by a pair of DMA channels
//! (RP2040 style) rather than a dedicated SPI peripheral.
//!
//! The crate is layered leaf first:
//! * [`pio`]: the serial engine, two fixed state-machine programs for SPI mode 0 and mode 1.
//! * [`dma`]: the bulk transfer engine, a coupled feeder/drainer channel pair.
//! * [`blocking`]: chip-select framing and the JEDEC command set.
//! * [`stream`]: the line-oriented `flash_prog` programming protocol.
//!
//! Hardware is reached only through the traits in [`pio`] and [`dma`] plus
//! [embedded-hal](https://github.com/rust-embedded/embedded-hal) pins and delays, so the same
//! driver runs on a board or against an emulated chip.

#[macro_use]
mod fmt;

pub mod address;
pub mod blocking;
mod command;
pub mod dma;
pub mod error;
pub mod pio;
pub mod protocol;
pub mod register;
pub mod stream;

pub use address::{PAGE_SIZE, SECTOR_SIZE};
