// References:
// [1] https://en.wikipedia.org/wiki/GUID_Partition_Table
// [2] https://uefi.org/specs/UEFI/2.10/05_GUID_Partition_Table_Format.html

use scroll::{Pread, LE};

use crate::guid::GUID_LEN;

pub const SIGNATURE: &[u8; 8] = b"EFI PART";
/// The header is always read from LBA 1.
pub const HEADER_OFFSET: u64 = 512;
pub const HEADER_LEN: usize = 92;
/// Entries smaller than this are suspicious, but still honoured.
pub const MIN_ENTRY_SZ: u32 = 128;
/// Bytes of an entry that are actually decoded.
pub const DECODED_ENTRY_LEN: usize = 48;

#[derive(Debug, Pread)]
pub struct Header {
    pub signature: [u8; 8],
    pub revision: u32,         // `unused`
    pub header_size: u32,      // `unused`
    pub header_crc32: u32,     // `unused`
    pub reserved: u32,         // `unused`
    pub current_lba: u64,      // `unused`
    pub backup_lba: u64,       // `unused`
    pub first_usable_lba: u64, // `unused`
    pub last_usable_lba: u64,  // `unused`
    pub disk_guid: [u8; 16],   // `unused`
    pub entries_lba: u64,
    pub entry_count: u32,
    pub entry_size: u32,
    pub entries_crc32: u32, // `unused`
}

impl Header {
    pub fn new(buf: &[u8; HEADER_LEN]) -> Result<Self, scroll::Error> {
        buf.pread_with(0, LE)
    }

    pub fn is_valid(&self) -> bool {
        &self.signature == SIGNATURE
    }
}

#[derive(Debug, Pread)]
pub struct Entry {
    pub type_guid: [u8; 16],
    pub unique_guid: [u8; 16], // `unused`
    pub first_lba: u64,
    pub last_lba: u64,
    // attributes and name follow, `unused`
}

impl Entry {
    pub fn new(buf: &[u8]) -> Result<Self, scroll::Error> {
        buf.pread_with(0, LE)
    }

    pub fn is_unused(&self) -> bool {
        self.type_guid == [0u8; GUID_LEN]
    }
}
