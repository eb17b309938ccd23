//! SmartCompress command-line entry point.

mod config;
mod render;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use smartcompress_codec::CompressionEngine;
use smartcompress_orchestrator::{ArchivePart, CompressionJob, Orchestrator, SourceFile, reassemble};
use smartcompress_protocol::JobMode;
use smartcompress_remote::HttpRemote;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "smartcompress", version)]
#[command(about = "Compress files locally or through a remote assembly service", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the per-user location).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compress one or more files
    Compress(CompressArgs),

    /// Extract a zip or 7z archive, or decompress a single-file archive
    Extract {
        archive: PathBuf,

        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Rebuild a file from its split parts
    Reassemble {
        #[arg(required = true)]
        parts: Vec<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Args)]
struct CompressArgs {
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Archive file, or a directory for split and remote output.
    #[arg(short, long)]
    output: PathBuf,

    /// Codec: zip, 7z, store, gzip, deflate, bzip2, zstd, xz, brotli.
    #[arg(short, long)]
    algorithm: Option<String>,

    /// Compression level, 1 (fastest) to 9 (smallest).
    #[arg(short, long)]
    level: Option<u32>,

    /// Split each file into parts of this size (e.g. 100M).
    #[arg(long, value_parser = parse_size)]
    split: Option<u64>,

    /// local, remote or auto.
    #[arg(long, default_value = "auto")]
    mode: JobMode,

    /// In auto mode, send large files to the remote service.
    #[arg(long)]
    remote: bool,

    /// Remote service base URL (overrides the configuration file).
    #[arg(long)]
    remote_url: Option<String>,

    /// Remote API token (overrides the configuration file).
    #[arg(long, env = "SMARTCOMPRESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Upload chunk size (e.g. 50M).
    #[arg(long, value_parser = parse_size)]
    chunk_size: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    tracing::debug!(algorithm = %config.algorithm, level = config.level, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Compress(args) => rt.block_on(compress(args, config)),
        Command::Extract { archive, output } => {
            for path in extract(&archive, &output)? {
                println!("{}", path.display());
            }
            Ok(())
        }
        Command::Reassemble { parts, output } => {
            let parts = parts
                .into_iter()
                .map(ArchivePart::from_path)
                .collect::<Result<Vec<_>, _>>()?;
            let bytes = reassemble(&CompressionEngine::default(), &parts, &output)?;
            tracing::info!(output = %output.display(), bytes, "reassembled");
            Ok(())
        }
    }
}

async fn compress(args: CompressArgs, mut config: Config) -> anyhow::Result<()> {
    if let Some(url) = args.remote_url {
        config.remote.url = Some(url);
    }
    if let Some(token) = args.token {
        config.remote.token = Some(token);
    }
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }

    let sources = args
        .inputs
        .iter()
        .map(SourceFile::from_path)
        .collect::<Result<Vec<_>, _>>()?;
    let mut job = CompressionJob::new(sources, args.output)
        .with_algorithm(args.algorithm.unwrap_or_else(|| config.algorithm.clone()))
        .with_level(args.level.unwrap_or(config.level))
        .with_mode(args.mode)
        .with_remote_opt_in(args.remote);
    if let Some(split) = args.split {
        job = job.with_split_size(split);
    }

    let mut orchestrator = Orchestrator::new(config.orchestrator_config());
    if let Some(remote) = config.remote_config() {
        let client = HttpRemote::new(&remote)?;
        tracing::debug!(endpoint = client.base_url(), "remote service configured");
        orchestrator = orchestrator.with_remote(Arc::new(client));
    }

    let events = orchestrator
        .take_events()
        .context("event channel already taken")?;
    let renderer = tokio::spawn(render::render_events(events));
    let handle = orchestrator.spawn(job)?;

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            cancel.cancel();
        }
    });

    let result = handle.join().await;
    let _ = renderer.await;
    let artifact = result?;
    tracing::info!(
        route = ?artifact.route,
        bytes_in = artifact.bytes_in,
        bytes_out = artifact.bytes_out,
        "compression finished"
    );
    for failure in &artifact.failures {
        eprintln!("Skipped {}: {}", failure.file, failure.error);
    }
    if !artifact.is_complete() {
        anyhow::bail!("{} file(s) were not compressed", artifact.failures.len());
    }
    Ok(())
}

/// Extracts a container archive into `output`, or decompresses a
/// single-stream archive to `output/<archive stem>`.
fn extract(archive: &Path, output: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let engine = CompressionEngine::default();
    let codec = engine.for_path(archive)?;
    if codec.is_container() {
        return Ok(codec.extract(archive, output)?);
    }

    let stem = archive
        .file_stem()
        .with_context(|| format!("no file name in {}", archive.display()))?;
    fs::create_dir_all(output)?;
    let dest = output.join(stem);

    let src = File::open(archive).with_context(|| format!("opening {}", archive.display()))?;
    let result = (|| -> anyhow::Result<()> {
        let mut writer = BufWriter::new(File::create(&dest)?);
        engine.decompress_stream(codec.id(), BufReader::new(src), &mut writer)?;
        writer.flush()?;
        Ok(())
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&dest);
        return Err(e.context(format!("decompressing {}", archive.display())));
    }
    Ok(vec![dest])
}

/// Parses a byte count with an optional binary suffix: `512`, `64K`, `50M`,
/// `2G`, `1GiB`.
fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size: {s}"))?;
    let shift = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 10,
        "m" | "mb" | "mib" => 20,
        "g" | "gb" | "gib" => 30,
        "t" | "tb" | "tib" => 40,
        other => return Err(format!("unknown size unit: {other}")),
    };
    let size = value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| format!("size too large: {s}"))?;
    if size == 0 {
        return Err("size must be greater than zero".into());
    }
    Ok(size)
}
