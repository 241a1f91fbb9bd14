use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use extractpart::{Image, OpenOptions, Unit, DEFAULT_MAX_CHAIN_HOPS};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// MBR or GUID disk image file. May be .zip
    image: PathBuf,
    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
    /// Unit for offsets and sizes
    #[arg(short, long, value_enum, ignore_case = true, default_value_t = Unit::M)]
    unit: Unit,
    /// Fail when a partition extends past the end of the image
    #[arg(long)]
    strict: bool,
    /// Most EBRs followed per extended partition
    #[arg(long, default_value_t = DEFAULT_MAX_CHAIN_HOPS)]
    max_chain_hops: usize,
    /// Also accept ZIP members ending in SUFFIX (besides .img)
    #[arg(long, value_name = "SUFFIX")]
    image_suffix: Vec<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print partition table info
    Info,
    /// Extract partition to file (or - for stdout)
    Extract {
        /// Partition # or GUID
        partition: String,
        output: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_tracing(args.verbose);

    let mut opts = OpenOptions::new();
    opts.strict_bounds(args.strict).max_chain_hops(args.max_chain_hops);
    for suffix in &args.image_suffix {
        opts.image_suffix(suffix.as_str());
    }
    let image = opts
        .open(&args.image)
        .with_context(|| format!("open {}", args.image.display()))?;

    match args.command {
        Command::Info => info(&image, args.unit),
        Command::Extract { partition, output } => extract(image, &partition, &output),
    }
}

fn setup_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn info(image: &Image, unit: Unit) -> Result<()> {
    let mut stdout = io::stdout().lock();
    for entry in image.table() {
        writeln!(stdout, "{}", unit.describe(entry))?;
    }
    Ok(())
}

fn extract(mut image: Image, partition: &str, output: &str) -> Result<()> {
    let mut out: Box<dyn Write> = if output == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(File::create(output).with_context(|| format!("create {output}"))?)
    };
    image
        .extract(partition, &mut out)
        .with_context(|| format!("extract partition {partition}"))?;
    Ok(())
}
