use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::{debug, info_span, Span};

use crate::device::{ImageSource, RawImage};
use crate::error::{Error, Result};
use crate::extract;
use crate::gpt;
use crate::mbr;
use crate::spec::mbr::{BootSec, Sec, SEC_SZ};
use crate::table::{PartitionEntry, PartitionTable};
use crate::zip::ZipMember;

pub const DEFAULT_MAX_CHAIN_HOPS: usize = 1024;
pub const DEFAULT_IMAGE_SUFFIX: &str = ".img";

/// How an image is opened and how forgiving parsing is.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    strict_bounds: bool,
    max_chain_hops: usize,
    image_suffixes: Vec<String>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            strict_bounds: false,
            max_chain_hops: DEFAULT_MAX_CHAIN_HOPS,
            image_suffixes: vec![DEFAULT_IMAGE_SUFFIX.to_owned()],
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject partitions that end past the end of the image.
    pub fn strict_bounds(&mut self, strict: bool) -> &mut Self {
        self.strict_bounds = strict;
        self
    }

    /// Most EBRs visited per extended partition before the chain is dropped.
    pub fn max_chain_hops(&mut self, hops: usize) -> &mut Self {
        self.max_chain_hops = hops;
        self
    }

    /// Also accept archive members ending in `suffix`.
    pub fn image_suffix(&mut self, suffix: impl Into<String>) -> &mut Self {
        self.image_suffixes.push(suffix.into());
        self
    }

    /// Open `path` as a raw image, or as a ZIP archive when it ends in `.zip`.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<Image> {
        let path = path.as_ref();
        let is_zip = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        let kind = if is_zip { "zip" } else { "raw" };
        let span = info_span!("image", path = %path.display(), kind);

        let source: Box<dyn ImageSource> = {
            let _enter = span.enter();
            let file = File::open(path)?;
            if is_zip {
                debug!("open ZIP");
                Box::new(ZipMember::open(file, &self.image_suffixes)?)
            } else {
                debug!("open RAW");
                Box::new(RawImage::new(file))
            }
        };
        Image::load(source, self, span)
    }

    /// Parse an already opened image.
    pub fn open_source(&self, source: Box<dyn ImageSource>) -> Result<Image> {
        Image::load(source, self, info_span!("image", kind = "source"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Mbr,
    Gpt,
}

/// An opened disk image and the partition table decoded from it.
pub struct Image {
    source: Box<dyn ImageSource>,
    table: PartitionTable,
    scheme: Scheme,
    span: Span,
}

impl Image {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        OpenOptions::new().open(path)
    }

    fn load(mut source: Box<dyn ImageSource>, opts: &OpenOptions, span: Span) -> Result<Self> {
        let guard = span.enter();

        let mut buf: Sec = [0u8; SEC_SZ];
        source.read_exact_at(0, &mut buf)?;
        let mbr = BootSec::new(&buf)?;
        if !mbr.is_valid() {
            return Err(Error::CorruptImage(format!(
                "MBR[510:512]={:02X?}",
                &buf[510..]
            )));
        }

        let header = if mbr.is_protective() {
            debug!("maybe GPT");
            gpt::read_header(source.as_mut())?
        } else {
            None
        };

        let mut table = PartitionTable::new();
        let scheme = match header {
            Some(header) => {
                gpt::read_partitions(source.as_mut(), &header, &mut table)?;
                Scheme::Gpt
            }
            None => {
                mbr::read_partitions(source.as_mut(), &mbr, opts.max_chain_hops, &mut table)?;
                Scheme::Mbr
            }
        };

        if opts.strict_bounds {
            check_bounds(source.as_mut(), &table)?;
        }
        debug!(?scheme, partitions = table.len(), "partition table loaded");

        drop(guard);
        Ok(Image {
            source,
            table,
            scheme,
            span,
        })
    }

    pub fn table(&self) -> &PartitionTable {
        &self.table
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Find a partition by name or by GUID text.
    pub fn find(&self, partition: &str) -> Result<&PartitionEntry> {
        self.table.resolve(partition)
    }

    /// Stream `partition` (a name or GUID text) to `out`.
    pub fn extract(&mut self, partition: &str, out: &mut dyn Write) -> Result<u64> {
        let _enter = self.span.enter();
        let entry = self.table.resolve(partition)?;
        extract::extract(self.source.as_mut(), entry, out)
    }
}

fn check_bounds(source: &mut dyn ImageSource, table: &PartitionTable) -> Result<()> {
    let image_len = source.size()?;
    for entry in table {
        let end = entry.end().unwrap_or(u64::MAX);
        if end > image_len {
            return Err(Error::OutOfBounds {
                name: entry.name.clone(),
                end,
                image_len,
            });
        }
    }
    Ok(())
}
