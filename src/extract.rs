use std::io::Write;

use tracing::{debug, info};

use crate::device::ImageSource;
use crate::error::Result;
use crate::table::PartitionEntry;

pub const CHUNK_SZ: usize = 16 << 20;

/// Copy the bytes of `entry` to `out`, returning how many were written.
///
/// Stops early, without error, once the source runs dry; the output is then
/// shorter than `entry.size`.
pub fn extract(
    source: &mut dyn ImageSource,
    entry: &PartitionEntry,
    out: &mut dyn Write,
) -> Result<u64> {
    info!(partition = %entry.name, "extracting partition");
    copy_range(source, entry.offset, entry.size, out)
}

pub fn copy_range(
    source: &mut dyn ImageSource,
    offset: u64,
    size: u64,
    out: &mut dyn Write,
) -> Result<u64> {
    let mut buf = vec![0u8; (size.min(CHUNK_SZ as u64)) as usize];
    let mut done = 0u64;
    while done < size {
        let want = (size - done).min(buf.len() as u64) as usize;
        let n = source.read_at(offset + done, &mut buf[..want])?;
        out.write_all(&buf[..n])?;
        done += n as u64;
        info!("{done}/{size}");
        if n < want {
            debug!(offset = offset + done, "image ended inside partition");
            break;
        }
    }
    out.flush()?;
    Ok(done)
}
