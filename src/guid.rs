// References:
// [1] https://en.wikipedia.org/wiki/Universally_unique_identifier#Encoding

use crate::error::{Error, Result};

pub const GUID_LEN: usize = 16;

/// Text form of the all-zero GUID, which marks an unused GPT slot.
pub const NIL_GUID: &str = "00000000-0000-0000-0000-000000000000";

const GROUP_WIDTHS: [usize; 5] = [8, 4, 4, 4, 12];

/// Format 16 on-disk bytes as `LLLLLLLL-LLLL-LLLL-BBBB-BBBBBBBBBBBB`.
///
/// The first three groups are stored little-endian, the last eight bytes
/// big-endian. Output is uppercase, the same string is used as the lookup key
/// for GPT partitions.
pub fn decode_guid(raw: &[u8; GUID_LEN]) -> String {
    let a = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let b = u16::from_le_bytes([raw[4], raw[5]]);
    let c = u16::from_le_bytes([raw[6], raw[7]]);
    let de = u64::from_be_bytes([
        raw[8], raw[9], raw[10], raw[11], raw[12], raw[13], raw[14], raw[15],
    ]);
    let d = de >> 48;
    let e = de & 0xFFFF_FFFF_FFFF;
    format!("{a:08X}-{b:04X}-{c:04X}-{d:04X}-{e:012X}")
}

/// Inverse of [`decode_guid`]. Either letter case is accepted.
pub fn encode_guid(text: &str) -> Result<[u8; GUID_LEN]> {
    let invalid = || Error::InvalidGuid(text.to_owned());

    let groups: Vec<&str> = text.split('-').collect();
    if groups.len() != GROUP_WIDTHS.len()
        || groups
            .iter()
            .zip(GROUP_WIDTHS)
            .any(|(g, w)| g.len() != w || !g.bytes().all(|ch| ch.is_ascii_hexdigit()))
    {
        return Err(invalid());
    }

    let a = u32::from_str_radix(groups[0], 16).map_err(|_| invalid())?;
    let b = u16::from_str_radix(groups[1], 16).map_err(|_| invalid())?;
    let c = u16::from_str_radix(groups[2], 16).map_err(|_| invalid())?;
    let d = u64::from_str_radix(groups[3], 16).map_err(|_| invalid())?;
    let e = u64::from_str_radix(groups[4], 16).map_err(|_| invalid())?;

    let mut raw = [0u8; GUID_LEN];
    raw[0..4].copy_from_slice(&a.to_le_bytes());
    raw[4..6].copy_from_slice(&b.to_le_bytes());
    raw[6..8].copy_from_slice(&c.to_le_bytes());
    raw[8..16].copy_from_slice(&(d << 48 | e).to_be_bytes());
    Ok(raw)
}

/// Whether `text` has the shape of a GUID, regardless of letter case.
pub fn looks_like_guid(text: &str) -> bool {
    encode_guid(text).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ESP_TYPE: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";
    const ESP_TYPE_RAW: [u8; 16] = [
        0x28, 0x73, 0x2A, 0xC1, 0x1F, 0xF8, 0xD2, 0x11, 0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9,
        0x3B,
    ];

    #[test]
    fn decodes_efi_system_partition_type() {
        assert_eq!(decode_guid(&ESP_TYPE_RAW), ESP_TYPE);
    }

    #[test]
    fn decodes_nil_guid() {
        assert_eq!(decode_guid(&[0u8; 16]), NIL_GUID);
    }

    #[test]
    fn encode_accepts_lowercase() {
        let raw = encode_guid(&ESP_TYPE.to_lowercase()).expect("lowercase guid");
        assert_eq!(raw, ESP_TYPE_RAW);
        assert_eq!(decode_guid(&raw), ESP_TYPE);
    }

    #[test]
    fn encode_rejects_malformed_text() {
        for text in [
            "",
            "C12A7328-F81F-11D2-BA4B",
            "C12A7328F81F-11D2-BA4B-00A0C93EC93B",
            "C12A7328-F81F-11D2-BA4B-00A0C93EC93G",
            "+12A7328-F81F-11D2-BA4B-00A0C93EC93B",
            "0",
        ] {
            assert!(
                matches!(encode_guid(text), Err(Error::InvalidGuid(_))),
                "{text:?} should be rejected"
            );
        }
        assert!(!looks_like_guid("1.0"));
        assert!(looks_like_guid(ESP_TYPE));
    }
}
