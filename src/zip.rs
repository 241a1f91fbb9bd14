// References:
// [1] https://pkware.cachefly.net/webdocs/casestudies/APPNOTE.TXT

use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::mem;

use flate2::{Decompress, FlushDecompress, Status};
use scroll::{Pread, LE};
use tracing::{debug, trace};

use crate::device::{fill, ImageSource};
use crate::error::{Error, Result};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;

const LOCAL_HEADER_LEN: u64 = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const EOCD_LEN: usize = 22;
const MAX_COMMENT_LEN: usize = 0xFFFF;

const FLAG_ENCRYPTED: u16 = 1 << 0;
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;
const INFLATE_CHUNK: usize = 64 << 10;
const ZIP64_SENTINEL: u32 = 0xFFFF_FFFF;

#[allow(dead_code)]
#[derive(Debug, Pread)]
struct EndOfCentralDir {
    signature: u32,
    disk_number: u16,
    cd_disk: u16,
    entries_on_disk: u16,
    total_entries: u16,
    cd_size: u32,
    cd_offset: u32,
    comment_len: u16,
}

#[allow(dead_code)]
#[derive(Debug, Pread)]
struct CentralHeader {
    signature: u32,
    version_made_by: u16, // `unused`
    version_needed: u16,  // `unused`
    flags: u16,
    method: u16,
    mod_time: u16, // `unused`
    mod_date: u16, // `unused`
    crc32: u32,    // `unused`
    compressed_size: u32,
    uncompressed_size: u32,
    name_len: u16,
    extra_len: u16,
    comment_len: u16,
    disk_start: u16,
    internal_attr: u16, // `unused`
    external_attr: u32, // `unused`
    local_header_offset: u32,
}

#[allow(dead_code)]
#[derive(Debug, Pread)]
struct LocalHeader {
    signature: u32,
    version_needed: u16, // `unused`
    flags: u16,          // `unused`
    method: u16,
    mod_time: u16,          // `unused`
    mod_date: u16,          // `unused`
    crc32: u32,             // `unused`
    compressed_size: u32,   // `unused`, may be deferred to a data descriptor
    uncompressed_size: u32, // `unused`
    name_len: u16,
    extra_len: u16,
}

/// The bytes of one stored or deflated member inside a ZIP archive.
pub struct ZipMember<D: Seek + Read> {
    archive: D,
    name: String,
    data_offset: u64,
    compressed_size: u64,
    size: u64,
    inflater: Option<Inflater>, // `None` when stored
}

impl<D: Seek + Read> ZipMember<D> {
    /// Select the first member whose name ends in one of `suffixes`.
    pub fn open(mut archive: D, suffixes: &[String]) -> Result<Self> {
        let archive_len = archive.seek(SeekFrom::End(0))?;
        let eocd = find_eocd(&mut archive, archive_len)?;
        let (name, header) = find_member(&mut archive, &eocd, suffixes)?;
        check_member(&name, &header)?;

        let mut buf = [0u8; LOCAL_HEADER_LEN as usize];
        read_exact_at(&mut archive, header.local_header_offset as u64, &mut buf)?;
        let local: LocalHeader = buf.pread_with(0, LE)?;
        if local.signature != LOCAL_HEADER_SIG || local.method != header.method {
            return Err(Error::UnsupportedArchive(format!(
                "local header of `{name}` does not match the central directory"
            )));
        }
        let data_offset = header.local_header_offset as u64
            + LOCAL_HEADER_LEN
            + local.name_len as u64
            + local.extra_len as u64;
        let compressed_size = header.compressed_size as u64;
        if data_offset + compressed_size > archive_len {
            return Err(Error::TruncatedImage);
        }

        let inflater = (header.method == METHOD_DEFLATED).then(Inflater::new);
        debug!(
            member = %name,
            data_offset,
            compressed_size,
            size = header.uncompressed_size,
            deflated = inflater.is_some(),
            "using archive member"
        );
        Ok(ZipMember {
            archive,
            name,
            data_offset,
            compressed_size,
            size: header.uncompressed_size as u64,
            inflater,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<D: Seek + Read> ImageSource for ZipMember<D> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let want = (self.size - offset).min(buf.len() as u64) as usize;
        let buf = &mut buf[..want];
        match &mut self.inflater {
            None => {
                self.archive.seek(SeekFrom::Start(self.data_offset + offset))?;
                fill(&mut self.archive, buf)
            }
            Some(inflater) => {
                let stream = Stream {
                    archive: &mut self.archive,
                    data_offset: self.data_offset,
                    compressed_size: self.compressed_size,
                };
                inflater.read_at(stream, offset, buf)
            }
        }
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.size)
    }
}

/// Compressed bytes of a member as they sit in the archive.
struct Stream<'a, D> {
    archive: &'a mut D,
    data_offset: u64,
    compressed_size: u64,
}

/// Inflates a member front to back. Reading behind the current position
/// restarts from the first compressed byte.
struct Inflater {
    state: Decompress,
    input: Vec<u8>,
    consumed: usize, // of `input`
    fetched: u64,    // compressed bytes loaded so far
    pos: u64,        // uncompressed bytes produced so far
    scratch: Vec<u8>,
}

impl Inflater {
    fn new() -> Self {
        Inflater {
            state: Decompress::new(false),
            input: Vec::new(),
            consumed: 0,
            fetched: 0,
            pos: 0,
            scratch: Vec::new(),
        }
    }

    fn restart(&mut self) {
        self.state.reset(false);
        self.input.clear();
        self.consumed = 0;
        self.fetched = 0;
        self.pos = 0;
    }

    fn read_at<D: Seek + Read>(
        &mut self,
        mut stream: Stream<'_, D>,
        offset: u64,
        buf: &mut [u8],
    ) -> io::Result<usize> {
        if offset < self.pos {
            trace!(from = self.pos, to = offset, "rewind deflate stream");
            self.restart();
        }

        let mut scratch = mem::take(&mut self.scratch);
        scratch.resize(INFLATE_CHUNK, 0);
        while self.pos < offset {
            let skip = (offset - self.pos).min(INFLATE_CHUNK as u64) as usize;
            if self.inflate(&mut stream, &mut scratch[..skip])? == 0 {
                self.scratch = scratch;
                return Ok(0);
            }
        }
        self.scratch = scratch;

        let mut filled = 0;
        while filled < buf.len() {
            match self.inflate(&mut stream, &mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    /// Produce at least one byte into `out`, or 0 at the end of the stream.
    fn inflate<D: Seek + Read>(
        &mut self,
        stream: &mut Stream<'_, D>,
        out: &mut [u8],
    ) -> io::Result<usize> {
        loop {
            if self.consumed == self.input.len() && self.fetched < stream.compressed_size {
                let len = (stream.compressed_size - self.fetched).min(INFLATE_CHUNK as u64);
                self.input.resize(len as usize, 0);
                stream
                    .archive
                    .seek(SeekFrom::Start(stream.data_offset + self.fetched))?;
                let n = fill(&mut *stream.archive, &mut self.input)?;
                if n == 0 {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "archive ends inside a deflated member",
                    ));
                }
                self.input.truncate(n);
                self.consumed = 0;
                self.fetched += n as u64;
            }

            let (in_before, out_before) = (self.state.total_in(), self.state.total_out());
            let status = self
                .state
                .decompress(&self.input[self.consumed..], out, FlushDecompress::None)
                .map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))?;
            let used = (self.state.total_in() - in_before) as usize;
            let produced = (self.state.total_out() - out_before) as usize;
            self.consumed += used;
            self.pos += produced as u64;

            if produced > 0 || status == Status::StreamEnd {
                return Ok(produced);
            }
            let starved = self.consumed == self.input.len();
            if used == 0 && (!starved || self.fetched == stream.compressed_size) {
                return Err(io::Error::new(
                    ErrorKind::InvalidData,
                    "deflate stream stalled before the end of the member",
                ));
            }
        }
    }
}

fn read_exact_at<D: Seek + Read>(archive: &mut D, offset: u64, buf: &mut [u8]) -> Result<()> {
    archive.seek(SeekFrom::Start(offset))?;
    if fill(archive, buf)? < buf.len() {
        return Err(Error::TruncatedImage);
    }
    Ok(())
}

/// Scan backwards over the archive tail, since a trailing comment may
/// follow the end-of-central-directory record.
fn find_eocd<D: Seek + Read>(archive: &mut D, archive_len: u64) -> Result<EndOfCentralDir> {
    let not_zip = || Error::UnsupportedArchive("no end of central directory record".into());
    if archive_len < EOCD_LEN as u64 {
        return Err(not_zip());
    }
    let tail_len = archive_len.min((EOCD_LEN + MAX_COMMENT_LEN) as u64) as usize;
    let tail_start = archive_len - tail_len as u64;
    let mut tail = vec![0u8; tail_len];
    read_exact_at(archive, tail_start, &mut tail)?;

    let sig = EOCD_SIG.to_le_bytes();
    for pos in (0..=tail_len - EOCD_LEN).rev() {
        if tail[pos..pos + 4] != sig {
            continue;
        }
        let eocd: EndOfCentralDir = tail.pread_with(pos, LE)?;
        if pos + EOCD_LEN + eocd.comment_len as usize > tail_len {
            trace!(pos, "skipping EOCD candidate with overlong comment");
            continue;
        }
        if eocd.disk_number != 0 || eocd.cd_disk != 0 || eocd.entries_on_disk != eocd.total_entries
        {
            return Err(Error::UnsupportedArchive("multi-disk archive".into()));
        }
        if eocd.cd_offset == ZIP64_SENTINEL || eocd.cd_size == ZIP64_SENTINEL {
            return Err(Error::UnsupportedArchive("zip64 archive".into()));
        }
        if eocd.cd_offset as u64 + eocd.cd_size as u64 > tail_start + pos as u64 {
            trace!(pos, "skipping EOCD candidate with out of range directory");
            continue;
        }
        return Ok(eocd);
    }
    Err(not_zip())
}

fn find_member<D: Seek + Read>(
    archive: &mut D,
    eocd: &EndOfCentralDir,
    suffixes: &[String],
) -> Result<(String, CentralHeader)> {
    let mut dir = vec![0u8; eocd.cd_size as usize];
    read_exact_at(archive, eocd.cd_offset as u64, &mut dir)?;

    let mut cursor = 0usize;
    for index in 0..eocd.total_entries {
        let header: CentralHeader = dir.pread_with(cursor, LE)?;
        if header.signature != CENTRAL_HEADER_SIG {
            return Err(Error::UnsupportedArchive(format!(
                "central directory entry {index} has a bad signature"
            )));
        }
        let name_start = cursor + CENTRAL_HEADER_LEN;
        let name_end = name_start + header.name_len as usize;
        let name = dir
            .get(name_start..name_end)
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
            .ok_or_else(|| {
                Error::UnsupportedArchive(format!("central directory entry {index} is truncated"))
            })?;
        trace!(index, member = %name, "archive member");

        if suffixes.iter().any(|suffix| name.ends_with(suffix.as_str())) {
            return Ok((name, header));
        }
        cursor = name_end + header.extra_len as usize + header.comment_len as usize;
    }
    Err(Error::NoImageMember)
}

fn check_member(name: &str, header: &CentralHeader) -> Result<()> {
    if header.flags & FLAG_ENCRYPTED != 0 {
        return Err(Error::UnsupportedArchive(format!("`{name}` is encrypted")));
    }
    match header.method {
        METHOD_STORED if header.compressed_size != header.uncompressed_size => {
            return Err(Error::UnsupportedArchive(format!(
                "stored member `{name}` has mismatched sizes"
            )));
        }
        METHOD_STORED | METHOD_DEFLATED => {}
        method => {
            return Err(Error::UnsupportedArchive(format!(
                "`{name}` uses compression method {method}"
            )));
        }
    }
    if header.disk_start != 0 {
        return Err(Error::UnsupportedArchive(format!("`{name}` lives on another disk")));
    }
    if header.uncompressed_size == ZIP64_SENTINEL
        || header.compressed_size == ZIP64_SENTINEL
        || header.local_header_offset == ZIP64_SENTINEL
    {
        return Err(Error::UnsupportedArchive(format!("`{name}` needs zip64")));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::{Cursor, Write};

    use flate2::write::DeflateEncoder;
    use flate2::Compression;

    use super::*;

    pub(crate) const DEFLATED: u16 = METHOD_DEFLATED;

    fn deflate(payload: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).expect("deflate payload");
        encoder.finish().expect("finish deflate")
    }

    /// Build a ZIP archive whose members all use `method`. Deflated members
    /// are compressed, any other method keeps the payload as is.
    pub(crate) fn build_zip(members: &[(&str, &[u8])], method: u16) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for (name, payload) in members {
            let offset = out.len() as u32;
            let name = name.as_bytes();
            let len = payload.len() as u32;
            let data = if method == METHOD_DEFLATED {
                deflate(payload)
            } else {
                payload.to_vec()
            };
            let data_len = data.len() as u32;

            out.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&method.to_le_bytes());
            out.extend_from_slice(&[0u8; 8]); // time, date, crc32
            out.extend_from_slice(&data_len.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(&3u16.to_le_bytes());
            out.extend_from_slice(name);
            out.extend_from_slice(b"xyz");
            out.extend_from_slice(&data);

            central.extend_from_slice(&CENTRAL_HEADER_SIG.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&method.to_le_bytes());
            central.extend_from_slice(&[0u8; 8]); // time, date, crc32
            central.extend_from_slice(&data_len.to_le_bytes());
            central.extend_from_slice(&len.to_le_bytes());
            central.extend_from_slice(&(name.len() as u16).to_le_bytes());
            central.extend_from_slice(&[0u8; 12]); // extra, comment, disk, attrs
            central.extend_from_slice(&offset.to_le_bytes());
            central.extend_from_slice(name);
        }

        let cd_offset = out.len() as u32;
        out.extend_from_slice(&central);
        out.extend_from_slice(&EOCD_SIG.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&(members.len() as u16).to_le_bytes());
        out.extend_from_slice(&(members.len() as u16).to_le_bytes());
        out.extend_from_slice(&(central.len() as u32).to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(b"note");
        out
    }

    fn suffixes() -> Vec<String> {
        vec![".img".to_owned()]
    }

    #[test]
    fn selects_first_image_member() {
        let archive = build_zip(
            &[
                ("README", &b"not an image"[..]),
                ("disk.img", &b"first image"[..]),
                ("other.img", &b"second image"[..]),
            ],
            METHOD_STORED,
        );
        let mut member = ZipMember::open(Cursor::new(archive), &suffixes()).expect("open member");
        assert_eq!(member.name(), "disk.img");
        assert_eq!(member.size().expect("size"), 11);

        let mut buf = [0u8; 32];
        let n = member.read_at(6, &mut buf).expect("read member");
        assert_eq!(&buf[..n], b"image");
        assert_eq!(member.read_at(11, &mut buf).expect("read at end"), 0);
    }

    #[test]
    fn archive_without_image_member_is_rejected() {
        let archive = build_zip(&[("disk.iso", &b"nope"[..])], METHOD_STORED);
        assert!(matches!(
            ZipMember::open(Cursor::new(archive), &suffixes()),
            Err(Error::NoImageMember)
        ));
    }

    #[test]
    fn deflated_member_reads_forward_and_back() {
        let payload: Vec<u8> = (0..300_000u32).map(|i| (i * 7 % 251) as u8).collect();
        let archive = build_zip(&[("disk.img", payload.as_slice())], METHOD_DEFLATED);
        assert!(archive.len() < payload.len());

        let mut member = ZipMember::open(Cursor::new(archive), &suffixes()).expect("open member");
        assert_eq!(member.size().expect("size"), payload.len() as u64);

        let mut buf = vec![0u8; 1000];
        assert_eq!(member.read_at(200_000, &mut buf).expect("skip ahead"), 1000);
        assert_eq!(buf, payload[200_000..201_000]);

        assert_eq!(member.read_at(10, &mut buf).expect("rewind"), 1000);
        assert_eq!(buf, payload[10..1010]);

        assert_eq!(member.read_at(299_500, &mut buf).expect("tail"), 500);
        assert_eq!(buf[..500], payload[299_500..]);
        assert_eq!(member.read_at(300_000, &mut buf).expect("past end"), 0);
    }

    #[test]
    fn garbage_deflate_stream_is_an_error() {
        let mut archive = build_zip(&[("disk.img", &[0x11u8; 4096][..])], METHOD_DEFLATED);
        // first data byte: final block of the reserved type 3
        archive[30 + "disk.img".len() + 3] = 0xFF;
        let mut member = ZipMember::open(Cursor::new(archive), &suffixes()).expect("open member");
        let mut buf = [0u8; 512];
        assert!(member.read_at(0, &mut buf).is_err());
    }

    #[test]
    fn other_compression_methods_are_unsupported() {
        let archive = build_zip(&[("disk.img", &b"bzip2?"[..])], 12);
        assert!(matches!(
            ZipMember::open(Cursor::new(archive), &suffixes()),
            Err(Error::UnsupportedArchive(_))
        ));
    }

    #[test]
    fn member_suffixes_are_configurable() {
        let archive = build_zip(
            &[("disk.img", &b"image"[..]), ("rootfs.raw", &b"raw"[..])],
            METHOD_STORED,
        );
        let suffixes = [".raw".to_owned()];
        let member = ZipMember::open(Cursor::new(archive), &suffixes).expect("open member");
        assert_eq!(member.name(), "rootfs.raw");
    }

    #[test]
    fn plain_file_is_not_an_archive() {
        let data = vec![0u8; 4096];
        assert!(matches!(
            ZipMember::open(Cursor::new(data), &suffixes()),
            Err(Error::UnsupportedArchive(_))
        ));
    }
}
