//! `source-image-assembler`: builds a source image for an already-built
//! binary image and pushes it to the registry (§4.6, §6).

use std::path::PathBuf;

use clap::Parser;
use srcbom_assemble::{run, AssembleConfig, DEFAULT_BSI_PATH};
use srcbom_cli::{write_result_to, Result};

/// Build and push a source image alongside an already-built binary image.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory holding the application source checkout.
    #[arg(short = 's', long = "source-dir")]
    source_dir: PathBuf,

    /// The binary image this source image accompanies.
    #[arg(long)]
    output_binary_image: String,

    /// One registry host[:port] per line. Only base images pulled from one
    /// of these are resolved for parent sources.
    #[arg(long, required = true)]
    registry_allowlist: String,

    /// One base image pullspec per line; only the last is used.
    #[arg(long, default_value = "")]
    base_images: String,

    /// Output directory of a prior `cachi2 fetch-deps` run.
    #[arg(long)]
    cachi2_artifacts_dir: Option<PathBuf>,

    /// Scratch directory for intermediate build state. A fresh temp
    /// directory is used when omitted.
    #[arg(short = 'w', long)]
    workspace: Option<PathBuf>,

    /// Path to the external `BuildSourceImage` executable. Defaults to
    /// the copy installed in the execution container.
    #[arg(long = "bsi")]
    bsi: Option<PathBuf>,

    /// Write the JSON result here instead of stdout.
    #[arg(long)]
    write_result_to: Option<PathBuf>,
}

#[snafu::report]
fn main() -> Result<()> {
    srcbom_cli::init_tracing();
    let args = Args::parse();

    let cfg = AssembleConfig {
        source_dir: args.source_dir,
        output_binary_image: args.output_binary_image,
        registry_allowlist: srcbom_cli::split_lines(&args.registry_allowlist),
        base_images: srcbom_cli::split_lines(&args.base_images),
        cachi2_artifacts_dir: args.cachi2_artifacts_dir,
        workspace: args.workspace,
        bsi_path: args.bsi.unwrap_or_else(|| PathBuf::from(DEFAULT_BSI_PATH)),
    };

    let result = run(&cfg);
    let failed = result.status != "success";
    write_result_to(args.write_result_to.as_deref(), &result)?;
    if failed {
        std::process::exit(1);
    }
    Ok(())
}
