use snafu::ResultExt;

use crate::error::{ParseSnafu, Result, SerializeSnafu};
use crate::layout::{sha256_hex, OciLayout};
use crate::model::{Descriptor, ImageConfiguration, History, MEDIA_TYPE_IMAGE_CONFIG};

/// The image config blob, read-modify-save with digest recomputation
/// (§4.2). `dirty` is set the moment a caller reaches for mutable access;
/// an untouched config is never re-hashed on `save`.
#[derive(Debug, Clone)]
pub struct Config {
    descriptor: Descriptor,
    inner: ImageConfiguration,
    dirty: bool,
}

impl Config {
    pub fn load(layout: &OciLayout, descriptor: Descriptor) -> Result<Self> {
        let bytes = layout.read_blob(&descriptor.digest)?;
        let inner: ImageConfiguration =
            serde_json::from_slice(&bytes).context(ParseSnafu { path: layout.blob_path(&descriptor.digest)? })?;
        Ok(Config {
            descriptor,
            inner,
            dirty: false,
        })
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn inner(&self) -> &ImageConfiguration {
        &self.inner
    }

    pub fn diff_ids(&self) -> &[String] {
        &self.inner.rootfs.diff_ids
    }

    pub fn history(&self) -> &[History] {
        &self.inner.history
    }

    /// Insert a `(diff_id, history)` pair at the front, keeping both arrays
    /// aligned with the manifest's `layers[]` (§4.6 step 7).
    pub fn prepend_layer(&mut self, diff_id: String, history: History) {
        self.inner.rootfs.diff_ids.insert(0, diff_id);
        self.inner.history.insert(0, history);
        self.dirty = true;
    }

    /// Remove the diff_id/history pair aligned with manifest `layers[idx]`
    /// (§4.3/§4.6 step 6 dedup pass).
    pub fn remove_layer_at(&mut self, idx: usize) {
        if idx < self.inner.rootfs.diff_ids.len() {
            self.inner.rootfs.diff_ids.remove(idx);
        }
        if idx < self.inner.history.len() {
            self.inner.history.remove(idx);
        }
        self.dirty = true;
    }

    /// §4.2 `Blob.save()` contract, specialised to the config blob: no-op
    /// unless touched; no-op if the recomputed digest is unchanged;
    /// otherwise write a new blob and return the new descriptor.
    pub fn save(&mut self, layout: &OciLayout) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let path_hint = layout.root().join("config");
        let bytes = serde_json::to_vec(&self.inner).context(SerializeSnafu { path: path_hint })?;
        let hex = sha256_hex(&bytes);
        let new_digest = format!("sha256:{hex}");
        self.dirty = false;
        if new_digest == self.descriptor.digest {
            return Ok(false);
        }
        layout.write_blob(&bytes)?;
        self.descriptor.digest = new_digest;
        self.descriptor.size = bytes.len() as u64;
        self.descriptor.media_type = MEDIA_TYPE_IMAGE_CONFIG.to_string();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RootFs;

    fn sample_config(diff_ids: Vec<&str>) -> (OciLayout, tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::ensure(dir.path()).unwrap();
        let inner = ImageConfiguration {
            architecture: Some("amd64".to_string()),
            os: Some("linux".to_string()),
            rootfs: RootFs {
                fs_type: "layers".to_string(),
                diff_ids: diff_ids.into_iter().map(|s| s.to_string()).collect(),
            },
            history: Vec::new(),
            config: None,
            extra: Default::default(),
        };
        let bytes = serde_json::to_vec(&inner).unwrap();
        let (digest, size) = layout.write_blob(&bytes).unwrap();
        let descriptor = Descriptor {
            media_type: MEDIA_TYPE_IMAGE_CONFIG.to_string(),
            digest,
            size,
            annotations: None,
            platform: None,
            extra: Default::default(),
        };
        let config = Config::load(&layout, descriptor).unwrap();
        (layout, dir, config)
    }

    #[test]
    fn prepend_layer_keeps_diff_ids_and_history_aligned() {
        let (_layout, _dir, mut config) = sample_config(vec!["sha256:base"]);
        config.prepend_layer(
            "sha256:new".to_string(),
            History {
                created: Some("now".to_string()),
                created_by: Some("bsi".to_string()),
                author: None,
                comment: None,
                empty_layer: None,
            },
        );
        assert_eq!(config.diff_ids(), &["sha256:new", "sha256:base"]);
        assert_eq!(config.history().len(), config.diff_ids().len());
        assert_eq!(config.history()[0].created_by.as_deref(), Some("bsi"));
    }

    #[test]
    fn remove_layer_at_keeps_diff_ids_and_history_aligned() {
        let (_layout, _dir, mut config) = sample_config(vec!["sha256:a", "sha256:b", "sha256:c"]);
        config.inner.history = vec![
            History { created: None, created_by: None, author: None, comment: None, empty_layer: None },
            History { created: None, created_by: None, author: None, comment: None, empty_layer: None },
            History { created: None, created_by: None, author: None, comment: None, empty_layer: None },
        ];
        config.remove_layer_at(1);
        assert_eq!(config.diff_ids(), &["sha256:a", "sha256:c"]);
        assert_eq!(config.history().len(), 2);
    }

    #[test]
    fn save_recomputes_digest_only_when_dirty() {
        let (layout, _dir, mut config) = sample_config(vec!["sha256:base"]);
        let original_digest = config.descriptor().digest.clone();

        assert!(!config.save(&layout).unwrap());
        assert_eq!(config.descriptor().digest, original_digest);

        config.prepend_layer("sha256:new".to_string(), History {
            created: None,
            created_by: None,
            author: None,
            comment: None,
            empty_layer: None,
        });
        assert!(config.save(&layout).unwrap());
        assert_ne!(config.descriptor().digest, original_digest);
        assert!(layout.blob_exists(&config.descriptor().digest).unwrap());
    }
}
