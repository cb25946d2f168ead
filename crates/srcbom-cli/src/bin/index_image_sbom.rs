//! `index-image-sbom`: synthesize an SPDX SBOM describing an image index
//! and the platform-specific manifests it contains (§6).

use std::path::PathBuf;

use clap::Parser;
use srcbom_cli::{read_json, write_result_to, Result};
use srcbom_sbom::index_image::create_index_image_sbom;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long)]
    image_index_url: String,

    #[arg(long)]
    image_index_digest: String,

    /// JSON produced by inspecting the image index manifest (e.g.
    /// `buildah manifest inspect`).
    #[arg(long)]
    inspect_input_file: PathBuf,

    /// Defaults to stdout.
    #[arg(long)]
    output_path: Option<PathBuf>,
}

#[snafu::report]
fn main() -> Result<()> {
    srcbom_cli::init_tracing();
    let args = Args::parse();

    let inspect_input = read_json(&args.inspect_input_file)?;
    let sbom = create_index_image_sbom(&args.image_index_url, &args.image_index_digest, &inspect_input)?;
    write_result_to(args.output_path.as_deref(), &sbom)
}
