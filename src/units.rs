use crate::spec::mbr::SEC_SZ;
use crate::table::PartitionEntry;

/// Display unit for offsets and sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Unit {
    /// 512-byte sectors
    S,
    /// bytes
    B,
    /// KiB
    K,
    /// MiB
    M,
    /// GiB
    G,
}

impl Unit {
    fn divisor(self) -> u64 {
        match self {
            Unit::S => SEC_SZ as u64,
            Unit::B => 1,
            Unit::K => 1 << 10,
            Unit::M => 1 << 20,
            Unit::G => 1 << 30,
        }
    }

    /// Bytes stay integral, every other unit may be fractional.
    pub fn format(self, bytes: u64) -> String {
        match self {
            Unit::B => bytes.to_string(),
            _ => format!("{:?}", bytes as f64 / self.divisor() as f64),
        }
    }

    /// One `info` line for `entry`, offsets and sizes in this unit.
    pub fn describe(self, entry: &PartitionEntry) -> String {
        format!(
            "Partition {} offset={} size={} type={} guid={}",
            entry.name,
            self.format(entry.offset),
            self.format(entry.size),
            entry.typ,
            entry.guid
        )
    }
}
