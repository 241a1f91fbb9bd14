// References:
// [1] https://en.wikipedia.org/wiki/Master_boot_record
// [2] https://en.wikipedia.org/wiki/Extended_boot_record

use std::collections::HashSet;

use tracing::{debug, error};

use crate::device::ImageSource;
use crate::error::Result;
use crate::spec::mbr::{BootSec, Sec, SEC_SZ};
use crate::table::{PartitionEntry, PartitionTable};

/// Register the four primary slots of `mbr`, descending into every
/// extended partition found among them.
pub fn read_partitions(
    source: &mut dyn ImageSource,
    mbr: &BootSec,
    max_hops: usize,
    table: &mut PartitionTable,
) -> Result<()> {
    debug!("read MBR partitions");
    for (i, slot) in mbr.slots.iter().enumerate() {
        if slot.is_empty() {
            continue;
        }
        let entry = PartitionEntry {
            name: i.to_string(),
            typ: slot.typ.to_string(),
            offset: slot.offset(),
            size: slot.size(),
            guid: String::new(),
        };
        debug!(%entry, "add");
        table.insert(entry);

        if slot.is_extended() {
            debug!(slot = i, "process extended partition");
            walk_chain(source, i, slot.offset(), max_hops, table)?;
        }
    }
    Ok(())
}

/// Follow the EBR linked list of the extended partition in slot `container`.
///
/// Link entries are relative to `chain_base`, the start of the extended
/// partition; logical partitions are relative to the EBR describing them.
/// A corrupt or looping chain is logged and abandoned, keeping whatever was
/// found before it. Only a short read propagates.
pub fn walk_chain(
    source: &mut dyn ImageSource,
    container: usize,
    chain_base: u64,
    max_hops: usize,
    table: &mut PartitionTable,
) -> Result<()> {
    let mut ebr_offset = chain_base;
    let mut logical = 0usize;
    let mut visited = HashSet::new();

    loop {
        if visited.len() >= max_hops {
            error!(
                container,
                max_hops, "ignore extended partition chain longer than hop limit"
            );
            return Ok(());
        }
        if !visited.insert(ebr_offset) {
            error!(container, ebr_offset, "ignore looping extended partition chain");
            return Ok(());
        }

        debug!(ebr_offset, "read EBR");
        let mut buf: Sec = [0u8; SEC_SZ];
        source.read_exact_at(ebr_offset, &mut buf)?;
        let ebr = BootSec::new(&buf)?;
        if !ebr.is_valid() {
            error!(container, ebr_offset, "ignore corrupt extended partition");
            return Ok(());
        }

        let mut next = None;
        for (pos, slot) in ebr.ebr_slots().iter().enumerate() {
            debug!(
                ebr_offset,
                pos,
                typ = slot.typ,
                offset = slot.offset(),
                size = slot.size(),
                "EBR slot"
            );
            if slot.is_empty() {
                return Ok(());
            }
            if slot.is_extended() {
                next = Some(chain_base + slot.offset());
                break;
            }

            let entry = PartitionEntry {
                name: format!("{container}.{logical}"),
                typ: slot.typ.to_string(),
                offset: ebr_offset + slot.offset(),
                size: slot.size(),
                guid: String::new(),
            };
            logical += 1;
            debug!(%entry, "add");
            table.insert(entry);
        }

        match next {
            Some(offset) => ebr_offset = offset,
            None => {
                debug!(ebr_offset, "EBR has no link, chain ends");
                return Ok(());
            }
        }
    }
}
