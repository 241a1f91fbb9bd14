//! On-disk layouts, decoded with `scroll`.

pub mod gpt;
pub mod mbr;
