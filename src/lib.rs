//! Enumerate and extract individual partitions of MBR or GPT disk images.
//!
//! An image is either a raw file or a ZIP archive holding an `.img` member,
//! stored or deflated. Extended partitions are followed through their EBR chain.

pub mod device;
pub mod error;
pub mod extract;
pub mod gpt;
pub mod guid;
pub mod image;
pub mod mbr;
pub mod spec;
pub mod table;
pub mod units;
mod zip;

pub use device::{ImageSource, RawImage};
pub use error::{Error, Result};
pub use guid::{decode_guid, encode_guid};
pub use image::{Image, OpenOptions, Scheme, DEFAULT_MAX_CHAIN_HOPS};
pub use table::{PartitionEntry, PartitionTable};
pub use units::Unit;
pub use zip::ZipMember;
