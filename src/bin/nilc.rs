//! `nilc`: combine NIfTI label masks from the command line.
//!
//! ```text
//! nilc liver.nii.gz tumor.nii.gz --label 2 --output merged
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use nilc::{combine, CombineConfig, RawFile};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "nilc", version, about = "Merge NIfTI label masks into one labeled volume")]
struct Cli {
    /// Input masks (.nii or .nii.gz), in merge order
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output filename; `.nii.gz` is appended when missing
    #[arg(short, long)]
    output: Option<String>,

    /// Value written into every foreground voxel
    #[arg(short, long, default_value = "1", allow_hyphen_values = true)]
    label: String,

    /// Directory the combined file is written to
    #[arg(short = 'd', long, default_value = ".")]
    out_dir: PathBuf,

    /// Overwrite an existing output file
    #[arg(long)]
    force: bool,

    /// Log per-file progress
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn read_input(path: &Path) -> Result<RawFile> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    debug!(file = %name, bytes = bytes.len(), "read input");
    Ok(RawFile::new(name, bytes))
}

/// Combine the inputs named on the command line and write the result.
///
/// Both summary tables are rendered to `out`. Returns the written path.
fn run(cli: Cli, out: &mut impl Write) -> Result<PathBuf> {
    let files = cli
        .inputs
        .iter()
        .map(|p| read_input(p))
        .collect::<Result<Vec<_>>>()?;

    let mut config = CombineConfig::default().label(cli.label);
    if let Some(output) = cli.output {
        config = config.output_name(output);
    }

    let combined = combine(files, &config)?;

    let target = cli.out_dir.join(&combined.filename);
    if target.exists() && !cli.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            target.display()
        );
    }
    fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("failed to create {}", cli.out_dir.display()))?;
    fs::write(&target, &combined.bytes)
        .with_context(|| format!("failed to write {}", target.display()))?;
    info!(path = %target.display(), "wrote combined volume");

    writeln!(out, "Before merging:")?;
    writeln!(out, "{}", combined.before)?;
    writeln!(out, "After merging:")?;
    writeln!(out, "{}", combined.after)?;
    writeln!(out, "Saved {}", target.display())?;
    Ok(target)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run(cli, &mut io::stdout().lock())?;
    Ok(())
}
