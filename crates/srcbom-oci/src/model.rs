//! Typed views over the JSON documents that make up an OCI image layout:
//! descriptors, the image index, an image manifest, and the image
//! configuration. Fields this crate doesn't act on are preserved via a
//! flattened catch-all map so a read-modify-save round trip never drops
//! data a producer we don't fully model put there.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MEDIA_TYPE_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageIndex {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for ImageIndex {
    fn default() -> Self {
        ImageIndex {
            schema_version: 2,
            media_type: MEDIA_TYPE_IMAGE_INDEX.to_string(),
            manifests: Vec::new(),
            annotations: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "created_by")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "empty_layer")]
    pub empty_layer: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    pub diff_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    pub rootfs: RootFs,
    #[serde(default)]
    pub history: Vec<History>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Get a string label out of the config's passthrough `config.Labels` map,
/// used by the source-image assembler to resolve a parent image's
/// `version`/`release` labels (§4.6 step 2).
pub fn config_label<'a>(config: &'a ImageConfiguration, key: &str) -> Option<&'a str> {
    config
        .config
        .as_ref()?
        .get("Labels")?
        .get(key)?
        .as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_round_trips_unknown_fields_through_the_extra_map() {
        let value = serde_json::json!({
            "mediaType": MEDIA_TYPE_IMAGE_MANIFEST,
            "digest": "sha256:abc",
            "size": 42,
            "urls": ["https://example.invalid/blob"],
        });
        let descriptor: Descriptor = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(descriptor.digest, "sha256:abc");
        assert_eq!(descriptor.size, 42);

        let round_tripped = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(round_tripped["urls"], value["urls"]);
    }

    #[test]
    fn image_manifest_round_trips_layers_in_order() {
        let value = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_IMAGE_MANIFEST,
            "config": {"mediaType": MEDIA_TYPE_IMAGE_CONFIG, "digest": "sha256:cfg", "size": 1},
            "layers": [
                {"mediaType": MEDIA_TYPE_LAYER_GZIP, "digest": "sha256:l1", "size": 10},
                {"mediaType": MEDIA_TYPE_LAYER_GZIP, "digest": "sha256:l2", "size": 20},
            ],
        });
        let manifest: ImageManifest = serde_json::from_value(value).unwrap();
        assert_eq!(manifest.layers[0].digest, "sha256:l1");
        assert_eq!(manifest.layers[1].digest, "sha256:l2");
    }

    #[test]
    fn config_label_reads_through_the_passthrough_config_value() {
        let config = ImageConfiguration {
            architecture: None,
            os: None,
            rootfs: RootFs {
                fs_type: "layers".to_string(),
                diff_ids: Vec::new(),
            },
            history: Vec::new(),
            config: Some(serde_json::json!({"Labels": {"version": "1.2.3"}})),
            extra: BTreeMap::new(),
        };
        assert_eq!(config_label(&config, "version"), Some("1.2.3"));
        assert_eq!(config_label(&config, "release"), None);
    }

    #[test]
    fn config_label_is_none_without_a_config_value() {
        let config = ImageConfiguration {
            architecture: None,
            os: None,
            rootfs: RootFs {
                fs_type: "layers".to_string(),
                diff_ids: Vec::new(),
            },
            history: Vec::new(),
            config: None,
            extra: BTreeMap::new(),
        };
        assert_eq!(config_label(&config, "version"), None);
    }
}
