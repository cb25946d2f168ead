//! `add-image-reference`: annotate an SBOM in place with a reference to
//! the image it describes (§4.9, §6).

use std::path::PathBuf;

use clap::Parser;
use srcbom_cli::{read_json, write_json_to, Result};
use srcbom_sbom::annotate::{add_image_reference, Image};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Pullspec (and tag, if any) of the image being annotated.
    #[arg(long)]
    image_url: String,

    /// Manifest digest of the image, `algo:hex`.
    #[arg(long)]
    image_digest: String,

    #[arg(short = 'i')]
    input: PathBuf,

    /// Defaults to overwriting the input file.
    #[arg(short = 'o')]
    output: Option<PathBuf>,
}

#[snafu::report]
fn main() -> Result<()> {
    srcbom_cli::init_tracing();
    let args = Args::parse();

    let doc = read_json(&args.input)?;
    let image = Image::from_url_and_digest(&args.image_url, &args.image_digest)?;
    let updated = add_image_reference(doc, &image)?;

    let output = args.output.as_ref().unwrap_or(&args.input);
    write_json_to(output, &updated)
}
