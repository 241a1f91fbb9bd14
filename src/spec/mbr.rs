// References:
// [1] https://en.wikipedia.org/wiki/Master_boot_record
// [2] https://en.wikipedia.org/wiki/Extended_boot_record

use scroll::{Pread, LE};

pub const SEC_SZ: usize = 512;
pub type Sec = [u8; SEC_SZ];

pub const BOOT_SIG: [u8; 2] = [0x55, 0xAA];
pub const SLOT_OFFSETS: [usize; 4] = [446, 462, 478, 494];
/// An EBR only carries meaningful data in its first two slots.
pub const EBR_SLOTS: usize = 2;

pub const TYPE_EMPTY: u8 = 0x00;
pub const TYPE_EXTENDED: u8 = 0x05;
pub const TYPE_EXTENDED_ALT: u8 = 0x07;
pub const TYPE_GPT_PROTECTIVE: u8 = 0xEE;

#[derive(Debug, Clone, Copy, Pread)]
pub struct PartitionEntry {
    pub active: u8,         // `unused`
    pub first_sec: [u8; 3], // `unused`, CHS
    pub typ: u8,
    pub last_sec: [u8; 3], // `unused`, CHS
    pub lba: u32,
    pub nsecs: u32,
}

impl PartitionEntry {
    pub fn is_empty(&self) -> bool {
        self.typ == TYPE_EMPTY
    }

    /// Types 5 and 7 both mark a container holding an EBR chain.
    pub fn is_extended(&self) -> bool {
        matches!(self.typ, TYPE_EXTENDED | TYPE_EXTENDED_ALT)
    }

    /// Start of the entry in bytes, relative to whatever sector it is counted from.
    pub fn offset(&self) -> u64 {
        self.lba as u64 * SEC_SZ as u64
    }

    pub fn size(&self) -> u64 {
        self.nsecs as u64 * SEC_SZ as u64
    }
}

/// An MBR or EBR sector; both share one layout.
#[derive(Debug)]
pub struct BootSec {
    pub slots: [PartitionEntry; 4],
    boot_sig: [u8; 2], // check only
}

impl BootSec {
    pub fn new(buf: &Sec) -> Result<Self, scroll::Error> {
        Ok(BootSec {
            slots: [
                buf.pread_with(SLOT_OFFSETS[0], LE)?,
                buf.pread_with(SLOT_OFFSETS[1], LE)?,
                buf.pread_with(SLOT_OFFSETS[2], LE)?,
                buf.pread_with(SLOT_OFFSETS[3], LE)?,
            ],
            boot_sig: buf.pread_with(510, LE)?,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.boot_sig == BOOT_SIG
    }

    /// Slot 0 claims the whole disk for a GPT.
    pub fn is_protective(&self) -> bool {
        self.slots[0].typ == TYPE_GPT_PROTECTIVE
    }

    pub fn ebr_slots(&self) -> &[PartitionEntry] {
        &self.slots[..EBR_SLOTS]
    }
}
