//! `sbom-merge`: folds one cachi2-flavoured SBOM and N scanner SBOMs (or N
//! scanner SBOMs alone) into one document, per §4.8 / §6. Flavour-prefix
//! parsing (`cachi2:`/`syft:`) is a CLI-layer concern — `srcbom-sbom`
//! itself only knows how to merge two already-loaded documents.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use serde_json::Value;
use srcbom_cli::{print_json, read_json, CliError, Result};
use srcbom_sbom::merge::{merge_n_way, merge_with_cachi2};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// SBOM path, optionally prefixed `cachi2:` or `syft:`. Defaults to
    /// `cachi2` when unprefixed.
    sbom_a: String,

    /// One or more SBOM paths, each optionally prefixed `cachi2:` or
    /// `syft:`. Defaults to `syft` when unprefixed.
    #[arg(required = true)]
    more_sboms: Vec<String>,
}

/// Splits `flavour:path` on the first colon; falls back to `default_flavour`
/// when there isn't one. Mirrors `merge_sboms.py`'s `parse_sbom_arg`.
fn parse_sbom_arg(arg: &str, default_flavour: &str) -> (String, String) {
    match arg.split_once(':') {
        Some((flavour, path)) => (flavour.to_lowercase(), path.to_string()),
        None => (default_flavour.to_string(), arg.to_string()),
    }
}

#[snafu::report]
fn main() -> Result<()> {
    srcbom_cli::init_tracing();
    let args = Args::parse();

    let mut by_flavour: HashMap<String, Vec<String>> = HashMap::new();
    let (flavour, path) = parse_sbom_arg(&args.sbom_a, "cachi2");
    by_flavour.entry(flavour).or_default().push(path);
    for arg in &args.more_sboms {
        let (flavour, path) = parse_sbom_arg(arg, "syft");
        by_flavour.entry(flavour).or_default().push(path);
    }

    let merged = match (by_flavour.remove("cachi2"), by_flavour.remove("syft"), by_flavour.is_empty()) {
        (Some(cachi2), Some(syft), true) if cachi2.len() == 1 => {
            let cachi2_doc = read_json(&PathBuf::from(&cachi2[0]))?;
            let syft_docs = read_docs(&syft)?;
            merge_with_cachi2(syft_docs, cachi2_doc)?
        }
        (None, Some(syft), true) => merge_n_way(read_docs(&syft)?)?,
        (cachi2, syft, rest_empty) => {
            return Err(CliError::Usage {
                what: format!(
                    "unsupported combination of SBOM flavours (cachi2={}, syft={}, other-flavours-present={}); \
                     this tool supports merging 0 or 1 cachi2 SBOM with >=1 syft SBOMs",
                    cachi2.map(|v| v.len()).unwrap_or(0),
                    syft.map(|v| v.len()).unwrap_or(0),
                    !rest_empty,
                ),
            })
        }
    };

    print_json(&merged)
}

fn read_docs(paths: &[String]) -> Result<Vec<Value>> {
    paths.iter().map(|p| read_json(&PathBuf::from(p))).collect()
}
