//! `sbom-for-oci-copy`: synthesize an SBOM over a list of artefacts copied
//! out of an OCI image, as recorded in a YAML manifest (§6).

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use srcbom_cli::{read_yaml_as, write_result_to, Result};
use srcbom_sbom::oci_copy::{build_oci_copy_sbom, OciCopyManifest, OciCopySbomType};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SbomTypeArg {
    Cyclonedx,
    Spdx,
}

impl From<SbomTypeArg> for OciCopySbomType {
    fn from(value: SbomTypeArg) -> Self {
        match value {
            SbomTypeArg::Cyclonedx => OciCopySbomType::CycloneDx,
            SbomTypeArg::Spdx => OciCopySbomType::Spdx,
        }
    }
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// YAML file with `{artifacts: [{source, filename, type, sha256sum}, ...]}`.
    manifest: PathBuf,

    /// Defaults to stdout.
    #[arg(short = 'o')]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "cyclonedx")]
    sbom_type: SbomTypeArg,
}

#[snafu::report]
fn main() -> Result<()> {
    srcbom_cli::init_tracing();
    let args = Args::parse();

    let manifest: OciCopyManifest = read_yaml_as(&args.manifest)?;
    let sbom = build_oci_copy_sbom(&manifest, args.sbom_type.into())?;
    write_result_to(args.output.as_deref(), &sbom)
}
