use std::io::{self, ErrorKind, Read, Seek, SeekFrom};

use crate::error::{Error, Result};

/// Random-access, read-only view of a disk image.
pub trait ImageSource {
    /// Read up to `buf.len()` bytes starting at `offset`. Fewer bytes are
    /// returned only when the image ends first.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total length of the image in bytes.
    fn size(&mut self) -> io::Result<u64>;

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.read_at(offset, buf)?;
        if n < buf.len() {
            return Err(Error::TruncatedImage);
        }
        Ok(())
    }
}

/// Fill `buf` from `device` until it is full or the device hits EOF.
pub(crate) fn fill<D: Read + ?Sized>(device: &mut D, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match device.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// A plain image file, or anything else seekable.
pub struct RawImage<D: Seek + Read> {
    device: D,
}

impl<D: Seek + Read> RawImage<D> {
    pub fn new(device: D) -> Self {
        RawImage { device }
    }
}

impl<D: Seek + Read> ImageSource for RawImage<D> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.device.seek(SeekFrom::Start(offset))?;
        fill(&mut self.device, buf)
    }

    fn size(&mut self) -> io::Result<u64> {
        self.device.seek(SeekFrom::End(0))
    }
}
