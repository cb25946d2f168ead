//! Source-Image Assembler (C6): gather → parent-sources resolution →
//! external builder → BSI-identity dedup → merge → push. Grounded on
//! `source_build.py`'s `build()`/`build_and_push()`/`generate_source_images`,
//! generalized per §4.6 to drive the parent-source merge through the OCI
//! layout model (`srcbom-oci`) instead of re-feeding extracted parent
//! layers back into the same external-builder invocation — see
//! `DESIGN.md`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use snafu::{ensure, ResultExt};
use srcbom_core::imageref::ImageReference;
use srcbom_oci::{inspect_layer, BsiIdentity, Index, OciLayout};
use srcbom_registry::{CopyOptions, RegistryOperator};

use crate::error::{JsonSnafu, NonZeroExitSnafu, Result, SpawnSnafu};
use crate::gather::{gather_app_source, gather_prefetched_sources, GatherDirs};

/// Default location of the external `BuildSourceImage` executable inside
/// the execution container, matching `source_build.py`'s `BSI` constant.
pub const DEFAULT_BSI_PATH: &str = "/opt/BuildSourceImage/bsi";

const BSI_DRV_RPM_DIR: &str = "sourcedriver_rpm_dir";
const BSI_DRV_EXTRA_SRC_DIR: &str = "sourcedriver_extra_src_dir";

#[derive(Debug, Clone)]
pub struct AssembleConfig {
    pub source_dir: PathBuf,
    pub output_binary_image: String,
    pub registry_allowlist: Vec<String>,
    pub base_images: Vec<String>,
    pub cachi2_artifacts_dir: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
    pub bsi_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub dependencies_included: bool,
    pub base_image_source_included: bool,
    pub image_url: String,
    pub image_digest: String,
}

impl BuildResult {
    fn blank() -> Self {
        BuildResult {
            status: "success",
            message: None,
            dependencies_included: false,
            base_image_source_included: false,
            image_url: String::new(),
            image_digest: String::new(),
        }
    }
}

/// Run the full pipeline. Any error is converted into a `status: "failure"`
/// result carrying a message instead of propagating — this mirrors the
/// original script's top-level `try/except` around `build()`, and is the
/// only place in this crate that swallows an error rather than bubbling it.
pub fn run(cfg: &AssembleConfig) -> BuildResult {
    match assemble(cfg) {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(component = "assemble", error = %e, "source image build failed");
            BuildResult {
                status: "failure",
                message: Some(e.to_string()),
                ..BuildResult::blank()
            }
        }
    }
}

fn assemble(cfg: &AssembleConfig) -> Result<BuildResult> {
    let mut result = BuildResult::blank();
    let registry = RegistryOperator::new();
    registry.ensure_available()?;

    let workspace_dir = match &cfg.workspace {
        Some(dir) => dir.clone(),
        None => tempfile::Builder::new()
            .suffix("-source-build-workspace")
            .tempdir()
            .context(SpawnSnafu { tool: "mkdtemp".to_string() })?
            .keep(),
    };
    let work_dir = workspace_dir.join("source-build");
    std::fs::create_dir_all(&work_dir).context(crate::error::CreateDirSnafu { path: work_dir.clone() })?;

    let mut dirs = GatherDirs::new();
    gather_app_source(&work_dir, &cfg.source_dir, &mut dirs)?;

    // Step 2: resolve a parent source image, gated by the registry allow-list.
    let mut parent_layout_dir: Option<PathBuf> = None;
    if let Some(base_image) = cfg.base_images.last() {
        if cfg.base_images.len() > 1 {
            tracing::info!(component = "assemble", count = cfg.base_images.len(), "multiple base images specified, using the last");
        }
        let allowed = is_base_image_allowed(base_image, &cfg.registry_allowlist)?;

        if allowed {
            if let Some(source_image) = resolve_parent_source_image(&registry, base_image)? {
                let dir = work_dir.join("parent_source_layout");
                registry.copy(
                    &format!("docker://{source_image}"),
                    &format!("oci:{}", dir.display()),
                    &CopyOptions {
                        remove_signatures: true,
                        digest_file: None,
                    },
                )?;
                parent_layout_dir = Some(dir);
                result.base_image_source_included = true;
            } else {
                tracing::warn!(component = "assemble", image = %base_image, "registry has no corresponding source image");
            }
        } else {
            tracing::info!(component = "assemble", image = %base_image, "base image registry not in allow-list, skipping parent sources");
        }
    } else {
        tracing::info!(component = "assemble", "no base image specified, skipping parent sources");
    }

    // Step 4: prefetch tree.
    if let Some(cachi2_dir) = &cfg.cachi2_artifacts_dir {
        result.dependencies_included = gather_prefetched_sources(&work_dir, cachi2_dir, &mut dirs)?;
    } else {
        tracing::info!(component = "assemble", "no cachi2 artifacts directory specified, skipping prefetched sources");
    }

    // Step 5: external layer builder over app + prefetch sources only.
    let build_dir = work_dir.join("bsi_build");
    let output_dir = work_dir.join("bsi_output");
    std::fs::create_dir_all(&build_dir).context(crate::error::CreateDirSnafu { path: build_dir.clone() })?;
    std::fs::create_dir_all(&output_dir).context(crate::error::CreateDirSnafu { path: output_dir.clone() })?;
    run_bsi(&cfg.bsi_path, &build_dir, &output_dir, &dirs)?;

    let local_layout = OciLayout::ensure(&output_dir)?;
    let mut local_index = Index::load(&local_layout)?;

    if let Some(parent_dir) = &parent_layout_dir {
        let parent_layout = OciLayout::ensure(parent_dir)?;
        let parent_index = Index::load(&parent_layout)?;
        let parent_manifest = parent_index.single_manifest()?;

        // Step 6: dedup, only when prefetch sources actually overlap.
        if result.dependencies_included {
            let identities: Result<HashSet<BsiIdentity>> = parent_manifest
                .layers()
                .iter()
                .map(|layer| {
                    let blob = parent_layout.open_blob(&layer.digest)?;
                    Ok(inspect_layer(blob)?)
                })
                .collect();
            let identities = identities?;

            let local_manifest = local_index.single_manifest_mut()?;
            let mut to_remove = None;
            for layer in local_manifest.layers() {
                let blob = local_layout.open_blob(&layer.digest)?;
                if identities.contains(&inspect_layer(blob)?) {
                    to_remove = Some(layer.clone());
                    break;
                }
            }
            if let Some(descriptor) = to_remove {
                local_manifest.remove_layer(&local_layout, &descriptor)?;
            }
        }

        // Step 7: merge, reverse-then-prepend so the parent's original
        // order ends up at the front of the local manifest.
        let local_manifest = local_index.single_manifest_mut()?;
        let layer_count = parent_manifest.layers().len();
        for i in (0..layer_count).rev() {
            let layer = parent_manifest.layers()[i].clone();
            local_layout.copy_blob_from(&parent_layout, &layer.digest)?;
            let diff_id = parent_manifest.config.diff_ids()[i].clone();
            let history = parent_manifest.config.history()[i].clone();
            local_manifest.prepend_layer_with_history(layer, diff_id, history);
        }
    }

    local_index.save(&local_layout)?;

    // Step 8: dual output references, push, capture the pushed digest.
    let deprecated_image = format!("{}.src", cfg.output_binary_image);
    let binary_digest = registry.inspect_manifest_digest(&cfg.output_binary_image)?;
    let repository = ImageReference::parse(&cfg.output_binary_image)?.repository;
    let source_image = format!("{repository}:{}.src", binary_digest.replace(':', "-"));
    let dest_images = [deprecated_image, source_image.clone()];
    result.image_url = source_image;

    let digest_file = tempfile::NamedTempFile::new().context(SpawnSnafu { tool: "mkstemp".to_string() })?;
    for dest in &dest_images {
        registry.copy(
            &format!("oci:{}", output_dir.display()),
            &format!("docker://{dest}"),
            &CopyOptions {
                remove_signatures: false,
                digest_file: Some(digest_file.path().to_path_buf()),
            },
        )?;
    }
    result.image_digest = registry.read_digest_file(digest_file.path())?;

    Ok(result)
}

/// §4.6 step 2 gate (spec.md §8 invariant 8): whether `base_image`'s registry
/// host is on `allowlist`. Kept separate from the network calls it guards so
/// it can be tested without a registry, the way `test_source_build.py`
/// isolates `test_do_nothing_with_unsupported_registry` from the subprocess
/// it wraps.
fn is_base_image_allowed(base_image: &str, allowlist: &[String]) -> Result<bool> {
    Ok(ImageReference::parse(base_image)?
        .registry_host()
        .is_some_and(|host| allowlist.iter().any(|a| a == host)))
}

/// §4.6 step 2: version/release first, then manifest digest. First hit via
/// `exists` wins; no hit anywhere → `None` (skip parent sources, non-fatal).
fn resolve_parent_source_image(registry: &RegistryOperator, base_image: &str) -> Result<Option<String>> {
    let parsed = ImageReference::parse(base_image)?;
    let repository = &parsed.repository;

    if let Some(digest) = &parsed.digest {
        let reference = format!("{repository}@{digest}");
        let config_json = registry.inspect_config(&reference)?;
        let config: srcbom_oci::ImageConfiguration = serde_json::from_value(config_json)
            .context(JsonSnafu { what: "image config".to_string() })?;
        if let (Some(version), Some(release)) = (
            srcbom_oci::model::config_label(&config, "version"),
            srcbom_oci::model::config_label(&config, "release"),
        ) {
            let candidate = format!("{repository}:{version}-{release}-source");
            if registry.exists(&candidate)? {
                return Ok(Some(candidate));
            }
        } else {
            tracing::warn!(component = "assemble", image = %base_image, "base image is not labelled with version and release");
        }
    }

    let digest = registry.inspect_manifest_digest(base_image)?;
    let candidate = format!("{repository}:{}.src", digest.replace(':', "-"));
    if registry.exists(&candidate)? {
        return Ok(Some(candidate));
    }

    Ok(None)
}

fn run_bsi(bsi_path: &Path, build_dir: &Path, output_dir: &Path, dirs: &GatherDirs) -> Result<()> {
    let mut args: Vec<String> = vec![
        "-b".to_string(),
        build_dir.display().to_string(),
        "-o".to_string(),
        output_dir.display().to_string(),
    ];
    let mut drivers: Vec<&str> = Vec::new();

    if let Some(rpm_dir) = &dirs.rpm_dir {
        drivers.push(BSI_DRV_RPM_DIR);
        args.push("-s".to_string());
        args.push(rpm_dir.display().to_string());
    }
    if !dirs.extra_src_dirs.is_empty() {
        drivers.push(BSI_DRV_EXTRA_SRC_DIR);
        for dir in &dirs.extra_src_dirs {
            args.push("-e".to_string());
            args.push(dir.display().to_string());
        }
    }
    args.push("-d".to_string());
    args.push(drivers.join(","));

    tracing::debug!(component = "assemble", tool = %bsi_path.display(), ?args, "invoking external layer builder");
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = duct::cmd(bsi_path.display().to_string(), arg_refs)
        .unchecked()
        .stdout_capture()
        .stderr_capture()
        .run()
        .context(SpawnSnafu { tool: bsi_path.display().to_string() })?;
    ensure!(
        output.status.success(),
        NonZeroExitSnafu {
            tool: bsi_path.display().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_result_serializes_without_message_on_success() {
        let result = BuildResult {
            status: "success",
            message: None,
            dependencies_included: true,
            base_image_source_included: false,
            image_url: "quay.io/ns/app:sha256-deadbeef.src".to_string(),
            image_digest: "sha256:abc".to_string(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("message").is_none());
        assert_eq!(json["status"], "success");
    }

    #[test]
    fn build_result_carries_message_on_failure() {
        let result = BuildResult {
            message: Some("boom".to_string()),
            ..BuildResult { status: "failure", ..BuildResult::blank() }
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["message"], "boom");
    }

    #[test]
    fn base_image_from_an_allowlisted_registry_is_allowed() {
        let allowlist = vec!["registry.redhat.io".to_string()];
        let allowed =
            is_base_image_allowed("registry.redhat.io/ubi9/ubi:9.4", &allowlist).unwrap();
        assert!(allowed);
    }

    #[test]
    fn base_image_from_an_unsupported_registry_is_not_allowed() {
        let allowlist = vec!["registry.redhat.io".to_string()];
        let allowed = is_base_image_allowed("docker.io/library/ubuntu:22.04", &allowlist).unwrap();
        assert!(!allowed);
    }

    #[test]
    fn empty_allowlist_allows_nothing() {
        let allowed = is_base_image_allowed("registry.redhat.io/ubi9/ubi:9.4", &[]).unwrap();
        assert!(!allowed);
    }
}
