use snafu::ResultExt;

use crate::error::{
    EmptyIndexSnafu, MissingIndexSnafu, ParseSnafu, ReadSnafu, Result, SerializeSnafu, WriteSnafu,
};
use crate::layout::OciLayout;
use crate::manifest::Manifest;
use crate::model::ImageIndex;

/// `index.json` plus its loaded manifests (§4.2). This system's images are
/// always single-manifest (Non-goal: no multi-platform index handling
/// beyond what `index-image-sbom` reads structurally), so most callers go
/// straight to `Index::single_manifest`.
#[derive(Debug)]
pub struct Index {
    inner: ImageIndex,
    manifests: Vec<Manifest>,
}

impl Index {
    pub fn load(layout: &OciLayout) -> Result<Self> {
        let path = layout.index_path();
        if !path.exists() {
            return MissingIndexSnafu {
                root: layout.root().to_path_buf(),
            }
            .fail();
        }
        let bytes = std::fs::read(&path).context(ReadSnafu { path: path.clone() })?;
        let inner: ImageIndex = serde_json::from_slice(&bytes).context(ParseSnafu { path })?;
        let manifests = inner
            .manifests
            .iter()
            .cloned()
            .map(|d| Manifest::load(layout, d))
            .collect::<Result<Vec<_>>>()?;
        Ok(Index { inner, manifests })
    }

    pub fn manifests(&self) -> &[Manifest] {
        &self.manifests
    }

    pub fn manifests_mut(&mut self) -> &mut [Manifest] {
        &mut self.manifests
    }

    pub fn single_manifest(&self) -> Result<&Manifest> {
        self.manifests.first().ok_or_else(|| EmptyIndexSnafu.build())
    }

    pub fn single_manifest_mut(&mut self) -> Result<&mut Manifest> {
        if self.manifests.is_empty() {
            return EmptyIndexSnafu.fail();
        }
        Ok(&mut self.manifests[0])
    }

    /// §4.2 `Index.save()`: saves every manifest, deletes any manifest blob
    /// whose descriptor changed, and rewrites `index.json` only if at
    /// least one manifest descriptor changed.
    pub fn save(&mut self, layout: &OciLayout) -> Result<()> {
        let mut any_changed = false;
        let mut new_descriptors = Vec::with_capacity(self.manifests.len());
        for (slot, manifest) in self.inner.manifests.iter().zip(self.manifests.iter_mut()) {
            let old_digest = slot.digest.clone();
            if manifest.save(layout)? {
                any_changed = true;
                if old_digest != manifest.descriptor().digest {
                    layout.delete_blob(&old_digest)?;
                }
            }
            new_descriptors.push(manifest.descriptor().clone());
        }
        if any_changed {
            self.inner.manifests = new_descriptors;
            let path = layout.index_path();
            let bytes =
                serde_json::to_vec(&self.inner).context(SerializeSnafu { path: path.clone() })?;
            std::fs::write(&path, &bytes).context(WriteSnafu { path })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Descriptor, History, ImageConfiguration, ImageManifest, RootFs, MEDIA_TYPE_IMAGE_CONFIG,
        MEDIA_TYPE_IMAGE_MANIFEST, MEDIA_TYPE_LAYER_GZIP,
    };

    fn write_single_manifest_layout(layout: &OciLayout, layer_content: &[u8]) {
        let (layer_digest, layer_size) = layout.write_blob(layer_content).unwrap();
        let config_inner = ImageConfiguration {
            architecture: Some("amd64".to_string()),
            os: Some("linux".to_string()),
            rootfs: RootFs {
                fs_type: "layers".to_string(),
                diff_ids: vec![layer_digest.clone()],
            },
            history: vec![History {
                created: None,
                created_by: None,
                author: None,
                comment: None,
                empty_layer: None,
            }],
            config: None,
            extra: Default::default(),
        };
        let config_bytes = serde_json::to_vec(&config_inner).unwrap();
        let (config_digest, config_size) = layout.write_blob(&config_bytes).unwrap();

        let manifest_inner = ImageManifest {
            schema_version: 2,
            media_type: MEDIA_TYPE_IMAGE_MANIFEST.to_string(),
            config: Descriptor {
                media_type: MEDIA_TYPE_IMAGE_CONFIG.to_string(),
                digest: config_digest,
                size: config_size,
                annotations: None,
                platform: None,
                extra: Default::default(),
            },
            layers: vec![Descriptor {
                media_type: MEDIA_TYPE_LAYER_GZIP.to_string(),
                digest: layer_digest,
                size: layer_size,
                annotations: None,
                platform: None,
                extra: Default::default(),
            }],
            annotations: None,
            extra: Default::default(),
        };
        let manifest_bytes = serde_json::to_vec(&manifest_inner).unwrap();
        let (manifest_digest, manifest_size) = layout.write_blob(&manifest_bytes).unwrap();

        let index_inner = ImageIndex {
            manifests: vec![Descriptor {
                media_type: MEDIA_TYPE_IMAGE_MANIFEST.to_string(),
                digest: manifest_digest,
                size: manifest_size,
                annotations: None,
                platform: None,
                extra: Default::default(),
            }],
            ..ImageIndex::default()
        };
        let index_bytes = serde_json::to_vec(&index_inner).unwrap();
        std::fs::write(layout.index_path(), index_bytes).unwrap();
    }

    #[test]
    fn save_is_a_no_op_when_nothing_changed() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::ensure(dir.path()).unwrap();
        write_single_manifest_layout(&layout, b"layer bytes");

        let before = std::fs::read(layout.index_path()).unwrap();
        let mut index = Index::load(&layout).unwrap();
        index.save(&layout).unwrap();
        let after = std::fs::read(layout.index_path()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn save_rewrites_index_json_and_drops_stale_manifest_blob_when_a_manifest_changes() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::ensure(dir.path()).unwrap();
        write_single_manifest_layout(&layout, b"layer bytes");

        let mut index = Index::load(&layout).unwrap();
        let old_manifest_digest = index.single_manifest().unwrap().descriptor().digest.clone();

        let (new_layer_digest, new_layer_size) = layout.write_blob(b"extra layer").unwrap();
        index.single_manifest_mut().unwrap().prepend_layer_with_history(
            Descriptor {
                media_type: MEDIA_TYPE_LAYER_GZIP.to_string(),
                digest: new_layer_digest,
                size: new_layer_size,
                annotations: None,
                platform: None,
                extra: Default::default(),
            },
            "sha256:deadbeef".to_string(),
            History {
                created: None,
                created_by: None,
                author: None,
                comment: None,
                empty_layer: None,
            },
        );

        index.save(&layout).unwrap();

        let new_manifest_digest = index.single_manifest().unwrap().descriptor().digest.clone();
        assert_ne!(old_manifest_digest, new_manifest_digest);
        assert!(!layout.blob_exists(&old_manifest_digest).unwrap());
        assert!(layout.blob_exists(&new_manifest_digest).unwrap());

        let reloaded = Index::load(&layout).unwrap();
        assert_eq!(
            reloaded.single_manifest().unwrap().descriptor().digest,
            new_manifest_digest
        );
        assert_eq!(reloaded.single_manifest().unwrap().layers().len(), 2);
    }

    #[test]
    fn single_manifest_fails_on_an_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::ensure(dir.path()).unwrap();
        let index_bytes = serde_json::to_vec(&ImageIndex::default()).unwrap();
        std::fs::write(layout.index_path(), index_bytes).unwrap();

        let index = Index::load(&layout).unwrap();
        assert!(index.single_manifest().is_err());
    }

    #[test]
    fn load_fails_when_index_json_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::ensure(dir.path()).unwrap();
        assert!(Index::load(&layout).is_err());
    }
}
