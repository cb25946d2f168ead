//! `base-images-sbom`: append a base/builder-image formulation entry to an
//! SBOM in place, derived from a parsed Dockerfile stage graph and a
//! digest-resolution file (§4.9, §6).

use std::path::PathBuf;

use clap::Parser;
use srcbom_cli::{read_json, read_json_as, read_space_separated_map, write_json_to, Result};
use srcbom_sbom::annotate::{add_base_image_formulation, ParsedBuildFile};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// SBOM to annotate in place.
    #[arg(long)]
    sbom: PathBuf,

    /// Parsed build-file JSON (`{Stages: [...]}`, §6).
    #[arg(long)]
    parsed_dockerfile: PathBuf,

    /// Whitespace-separated `<original-ref> <resolved-ref-with-digest>`
    /// lines.
    #[arg(long)]
    base_images_digests: PathBuf,
}

#[snafu::report]
fn main() -> Result<()> {
    srcbom_cli::init_tracing();
    let args = Args::parse();

    let doc = read_json(&args.sbom)?;
    let build_file: ParsedBuildFile = read_json_as(&args.parsed_dockerfile)?;
    let digests = read_space_separated_map(&args.base_images_digests)?;

    let updated = add_base_image_formulation(doc, &build_file, &digests)?;
    write_json_to(&args.sbom, &updated)
}
