use snafu::{ensure, ResultExt};

use crate::config::Config;
use crate::error::{BlobNotFoundSnafu, LayerNotFoundSnafu, ParseSnafu, Result, SerializeSnafu};
use crate::layout::{sha256_hex, OciLayout};
use crate::model::{Descriptor, History, ImageManifest, MEDIA_TYPE_IMAGE_MANIFEST};

/// An image manifest blob plus its loaded config (§4.2). Layers are kept
/// as plain descriptors — this system never rewrites layer *content*, only
/// adds, removes and reorders whole layers, so there is no `Layer::save`
/// machinery symmetric to `Config::save`; see `DESIGN.md`.
#[derive(Debug, Clone)]
pub struct Manifest {
    descriptor: Descriptor,
    inner: ImageManifest,
    pub config: Config,
    dirty: bool,
}

impl Manifest {
    pub fn load(layout: &OciLayout, descriptor: Descriptor) -> Result<Self> {
        let bytes = layout.read_blob(&descriptor.digest)?;
        let inner: ImageManifest = serde_json::from_slice(&bytes)
            .context(ParseSnafu { path: layout.blob_path(&descriptor.digest)? })?;
        let config = Config::load(layout, inner.config.clone())?;
        Ok(Manifest {
            descriptor,
            inner,
            config,
            dirty: false,
        })
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn layers(&self) -> &[Descriptor] {
        &self.inner.layers
    }

    /// §4.2 `Manifest.prepend_layer`: descriptor only. Callers that also
    /// need `diff_ids[]`/`history[]` kept aligned (every caller in this
    /// system does) drive `Config::prepend_layer` alongside this, as the
    /// source-image assembler's merge step does (§4.6 step 7).
    pub fn prepend_layer(&mut self, descriptor: Descriptor) {
        self.inner.layers.insert(0, descriptor);
        self.dirty = true;
    }

    /// §4.2 `Manifest.remove_layer`: removes the descriptor and its aligned
    /// `diff_ids[i]`/`history[i]`, then deletes the blob file. Errors if the
    /// descriptor isn't present by exact equality.
    pub fn remove_layer(&mut self, layout: &OciLayout, descriptor: &Descriptor) -> Result<()> {
        let idx = self
            .inner
            .layers
            .iter()
            .position(|d| d == descriptor)
            .ok_or_else(|| {
                LayerNotFoundSnafu {
                    digest: descriptor.digest.clone(),
                }
                .build()
            })?;
        self.inner.layers.remove(idx);
        self.config.remove_layer_at(idx);
        layout.delete_blob(&descriptor.digest)?;
        self.dirty = true;
        Ok(())
    }

    pub fn prepend_layer_with_history(
        &mut self,
        descriptor: Descriptor,
        diff_id: String,
        history: History,
    ) {
        self.prepend_layer(descriptor);
        self.config.prepend_layer(diff_id, history);
    }

    /// §4.2 `Manifest.save()`: config first, then validate each remaining
    /// layer blob exists, then the manifest blob itself. Returns whether
    /// the manifest's own descriptor changed, so an owning `Index` knows
    /// whether to rewrite `index.json` and delete the stale manifest blob.
    pub fn save(&mut self, layout: &OciLayout) -> Result<bool> {
        if self.config.save(layout)? {
            self.inner.config = self.config.descriptor().clone();
            self.dirty = true;
        }

        for layer in &self.inner.layers {
            ensure!(
                layout.blob_exists(&layer.digest)?,
                BlobNotFoundSnafu {
                    root: layout.root().to_path_buf(),
                    digest: layer.digest.clone(),
                }
            );
        }

        if !self.dirty {
            return Ok(false);
        }

        let bytes = serde_json::to_vec(&self.inner)
            .context(SerializeSnafu { path: layout.root().join("manifest") })?;
        let hex = sha256_hex(&bytes);
        let new_digest = format!("sha256:{hex}");
        self.dirty = false;
        if new_digest == self.descriptor.digest {
            return Ok(false);
        }
        layout.write_blob(&bytes)?;
        self.descriptor.digest = new_digest;
        self.descriptor.size = bytes.len() as u64;
        self.descriptor.media_type = MEDIA_TYPE_IMAGE_MANIFEST.to_string();
        Ok(true)
    }
}
