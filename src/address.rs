use core::ops::Range;

pub const SECTOR_SIZE: u32 = 0x1000;
pub const PAGE_SIZE: u32 = 0x100;

/// One page program burst: `len` bytes of the source starting at `offset`, written to `address`.
/// A burst never crosses a page boundary.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Burst {
    pub address: u32,
    pub offset: usize,
    pub len: usize,
}

impl Burst {
    /// The slice of the source data covered by this burst
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Split `len` bytes starting at `address` into page aligned bursts.
pub fn page_bursts(address: u32, len: usize) -> PageBursts {
    PageBursts {
        address,
        offset: 0,
        len,
    }
}

/// Iterator returned by [`page_bursts`]
#[derive(Debug, Clone)]
pub struct PageBursts {
    address: u32,
    offset: usize,
    len: usize,
}

impl Iterator for PageBursts {
    type Item = Burst;

    fn next(&mut self) -> Option<Burst> {
        if self.offset >= self.len {
            return None;
        }
        let at = self.address.wrapping_add(self.offset as u32);
        let page_address = at & !(PAGE_SIZE - 1);
        let page_offset = at % PAGE_SIZE;
        let size = ((PAGE_SIZE - page_offset) as usize).min(self.len - self.offset);
        let burst = Burst {
            address: page_address + page_offset,
            offset: self.offset,
            len: size,
        };
        self.offset += size;
        Some(burst)
    }
}

/// Sector aligned addresses of every sector intersecting `[address, address + len)`.
pub fn covered_sectors(address: u32, len: usize) -> CoveredSectors {
    let end = address as u64 + len as u64;
    let first = (address & !(SECTOR_SIZE - 1)) as u64;
    CoveredSectors {
        next: if len == 0 { end } else { first },
        end,
    }
}

/// Iterator returned by [`covered_sectors`]
#[derive(Debug, Clone)]
pub struct CoveredSectors {
    next: u64,
    end: u64,
}

impl Iterator for CoveredSectors {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.next >= self.end {
            return None;
        }
        let sector = self.next as u32;
        self.next += SECTOR_SIZE as u64;
        Some(sector)
    }
}
