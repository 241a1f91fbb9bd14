// References:
// [1] https://en.wikipedia.org/wiki/GUID_Partition_Table

use tracing::{debug, warn};

use crate::device::ImageSource;
use crate::error::{Error, Result};
use crate::guid::{decode_guid, GUID_LEN};
use crate::spec::gpt::{
    Entry, Header, DECODED_ENTRY_LEN, HEADER_LEN, HEADER_OFFSET, MIN_ENTRY_SZ,
};
use crate::spec::mbr::SEC_SZ;
use crate::table::{PartitionEntry, PartitionTable};

/// Read the header that follows a protective MBR. `None` when the
/// `EFI PART` signature is missing and the disk should be treated as MBR.
pub fn read_header(source: &mut dyn ImageSource) -> Result<Option<Header>> {
    let mut buf = [0u8; HEADER_LEN];
    source.read_exact_at(HEADER_OFFSET, &mut buf)?;
    let header = Header::new(&buf)?;
    if header.is_valid() {
        debug!("found GPT");
        Ok(Some(header))
    } else {
        Ok(None)
    }
}

/// Register every used slot of the partition entry array.
pub fn read_partitions(
    source: &mut dyn ImageSource,
    header: &Header,
    table: &mut PartitionTable,
) -> Result<()> {
    debug!(
        entries_lba = header.entries_lba,
        entry_count = header.entry_count,
        entry_size = header.entry_size,
        "read GPT partitions"
    );
    if header.entry_size < MIN_ENTRY_SZ {
        warn!(
            entry_size = header.entry_size,
            "GPT partition info size < {MIN_ENTRY_SZ}"
        );
    }
    if (header.entry_size as usize) < DECODED_ENTRY_LEN {
        return Err(Error::CorruptImage(format!(
            "GPT partition entries of {} bytes are too small to hold LBAs",
            header.entry_size
        )));
    }

    let array_start = header
        .entries_lba
        .checked_mul(SEC_SZ as u64)
        .ok_or_else(|| Error::CorruptImage("GPT entry array offset overflow".into()))?;
    let mut buf = vec![0u8; header.entry_size as usize];

    for i in 0..header.entry_count {
        let at = (i as u64)
            .checked_mul(header.entry_size as u64)
            .and_then(|rel| rel.checked_add(array_start))
            .ok_or_else(|| Error::CorruptImage("GPT entry offset overflow".into()))?;
        source.read_exact_at(at, &mut buf)?;
        let raw = Entry::new(&buf)?;
        if raw.is_unused() {
            continue;
        }
        let Some(entry) = decode_entry(i, &raw)? else {
            continue;
        };
        table.register_guid(entry.guid.clone(), entry.name.clone());
        debug!(%entry, "add");
        table.insert(entry);
    }
    Ok(())
}

/// `None` for an entry whose LBAs run backwards; its index stays consumed.
fn decode_entry(index: u32, raw: &Entry) -> Result<Option<PartitionEntry>> {
    let bad = |what: &str| Error::CorruptImage(format!("GPT entry {index}: {what}"));
    let sectors = if raw.last_lba >= raw.first_lba {
        (raw.last_lba - raw.first_lba)
            .checked_add(1)
            .ok_or_else(|| bad("size overflow"))?
    } else if raw.first_lba - raw.last_lba == 1 {
        0
    } else {
        warn!(
            index,
            first_lba = raw.first_lba,
            last_lba = raw.last_lba,
            "ignore GPT entry ending before it starts"
        );
        return Ok(None);
    };
    let offset = raw
        .first_lba
        .checked_mul(SEC_SZ as u64)
        .ok_or_else(|| bad("offset overflow"))?;
    let size = sectors
        .checked_mul(SEC_SZ as u64)
        .ok_or_else(|| bad("size overflow"))?;

    let type_guid: &[u8; GUID_LEN] = &raw.type_guid;
    Ok(Some(PartitionEntry {
        name: index.to_string(),
        typ: decode_guid(type_guid),
        offset,
        size,
        // the type GUID doubles as the partition GUID, `unique_guid` is not surfaced
        guid: decode_guid(type_guid),
    }))
}
