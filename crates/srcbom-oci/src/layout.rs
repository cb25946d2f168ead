//! Filesystem access to an on-disk OCI image layout: `blobs/<algo>/<hex>`
//! plus `index.json` at the root. Everything here is synchronous — the
//! whole pipeline this crate supports runs as one blocking sequence of
//! external-tool invocations (see `srcbom-assemble`), so there is no
//! value in an async layer over plain `std::fs`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use snafu::ResultExt;

use crate::error::{
    BadSymlinkTargetSnafu, BlobNotFoundSnafu, ReadSnafu, RemoveSnafu, Result,
    UnsupportedDigestSnafu, WriteSnafu,
};

/// An open OCI image layout directory.
#[derive(Debug, Clone)]
pub struct OciLayout {
    root: PathBuf,
}

impl OciLayout {
    /// Open an existing layout, or create one with an empty `blobs/sha256`
    /// directory and `oci-layout` marker if none exists yet.
    pub fn ensure(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("blobs").join("sha256")).context(WriteSnafu {
            path: root.join("blobs/sha256"),
        })?;
        let marker = root.join("oci-layout");
        if !marker.exists() {
            fs::write(&marker, br#"{"imageLayoutVersion":"1.0.0"}"#)
                .context(WriteSnafu { path: marker })?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    /// Resolve `sha256:<hex>` to its blob path. Only sha256 is supported —
    /// every producer in this system writes sha256 digests.
    pub fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let (algo, hex) = digest
            .split_once(':')
            .unwrap_or(("", digest));
        if algo != "sha256" || hex.is_empty() {
            return UnsupportedDigestSnafu {
                digest: digest.to_string(),
            }
            .fail();
        }
        Ok(self.root.join("blobs").join("sha256").join(hex))
    }

    pub fn blob_exists(&self, digest: &str) -> Result<bool> {
        Ok(self.blob_path(digest)?.exists())
    }

    pub fn read_blob(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(digest)?;
        if !path.exists() {
            return BlobNotFoundSnafu {
                root: self.root.clone(),
                digest: digest.to_string(),
            }
            .fail();
        }
        fs::read(&path).context(ReadSnafu { path })
    }

    pub fn open_blob(&self, digest: &str) -> Result<fs::File> {
        let path = self.blob_path(digest)?;
        if !path.exists() {
            return BlobNotFoundSnafu {
                root: self.root.clone(),
                digest: digest.to_string(),
            }
            .fail();
        }
        fs::File::open(&path).context(ReadSnafu { path })
    }

    /// Write `content` as a new blob, named by its own digest. Returns
    /// `(digest, size)`. A no-op if a blob with that digest already exists.
    pub fn write_blob(&self, content: &[u8]) -> Result<(String, u64)> {
        let hex = sha256_hex(content);
        let path = self.root.join("blobs").join("sha256").join(&hex);
        if !path.exists() {
            let mut f = fs::File::create(&path).context(WriteSnafu { path: path.clone() })?;
            f.write_all(content).context(WriteSnafu { path })?;
        }
        Ok((format!("sha256:{hex}"), content.len() as u64))
    }

    /// Copy a blob from another layout into this one, by digest, without
    /// re-reading or re-hashing its content. Used when merging parent-image
    /// layers (§4.6 step 7): the bytes are untouched, only relocated.
    pub fn copy_blob_from(&self, other: &OciLayout, digest: &str) -> Result<()> {
        let src = other.blob_path(digest)?;
        let dest = self.blob_path(digest)?;
        if dest.exists() {
            return Ok(());
        }
        fs::copy(&src, &dest).context(WriteSnafu { path: dest })?;
        Ok(())
    }

    pub fn delete_blob(&self, digest: &str) -> Result<()> {
        let path = self.blob_path(digest)?;
        if path.exists() {
            fs::remove_file(&path).context(RemoveSnafu { path })?;
        }
        Ok(())
    }
}

pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    base16::encode_lower(&hasher.finalize())
}

/// Normalize a tar-entry symlink target (as recorded by the external layer
/// builder, always a relative `./blobs/sha256/<hex>` style path) into the
/// canonical `./blobs/sha256/<hex>` member name it must point at.
pub fn normalize_symlink_target(target: &str) -> Result<String> {
    let cleaned = target.trim_start_matches("./");
    let hex = cleaned
        .strip_prefix("blobs/sha256/")
        .filter(|h| !h.is_empty() && h.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or_else(|| {
            BadSymlinkTargetSnafu {
                target: target.to_string(),
            }
            .build()
        })?;
    Ok(format!("./blobs/sha256/{hex}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_blob_names_it_by_its_own_digest() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::ensure(dir.path()).unwrap();

        let (digest, size) = layout.write_blob(b"hello").unwrap();
        assert_eq!(digest, format!("sha256:{}", sha256_hex(b"hello")));
        assert_eq!(size, 5);

        assert!(layout.blob_exists(&digest).unwrap());
        let path = layout.blob_path(&digest).unwrap();
        assert!(path.exists());
        let on_disk = fs::read(&path).unwrap();
        assert_eq!(sha256_hex(&on_disk), digest.trim_start_matches("sha256:"));
        assert_eq!(layout.read_blob(&digest).unwrap(), b"hello");
    }

    #[test]
    fn write_blob_is_idempotent_for_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::ensure(dir.path()).unwrap();

        let (d1, _) = layout.write_blob(b"same").unwrap();
        let (d2, _) = layout.write_blob(b"same").unwrap();
        assert_eq!(d1, d2);
    }

    #[test]
    fn read_missing_blob_fails() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::ensure(dir.path()).unwrap();
        let digest = format!("sha256:{}", "a".repeat(64));
        assert!(!layout.blob_exists(&digest).unwrap());
        assert!(layout.read_blob(&digest).is_err());
    }

    #[test]
    fn blob_path_rejects_non_sha256_digests() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::ensure(dir.path()).unwrap();
        assert!(layout.blob_path("sha512:deadbeef").is_err());
        assert!(layout.blob_path("not-a-digest").is_err());
    }

    #[test]
    fn copy_blob_from_relocates_bytes_without_rehashing() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let src = OciLayout::ensure(src_dir.path()).unwrap();
        let dest = OciLayout::ensure(dest_dir.path()).unwrap();

        let (digest, _) = src.write_blob(b"parent layer").unwrap();
        assert!(!dest.blob_exists(&digest).unwrap());
        dest.copy_blob_from(&src, &digest).unwrap();
        assert!(dest.blob_exists(&digest).unwrap());
        assert_eq!(dest.read_blob(&digest).unwrap(), b"parent layer");
    }

    #[test]
    fn delete_blob_is_a_no_op_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::ensure(dir.path()).unwrap();
        let digest = format!("sha256:{}", "b".repeat(64));
        assert!(layout.delete_blob(&digest).is_ok());
    }

    #[test]
    fn normalize_symlink_target_accepts_relative_blob_path() {
        let hex = "c".repeat(64);
        let target = format!("./blobs/sha256/{hex}");
        assert_eq!(normalize_symlink_target(&target).unwrap(), target);
    }

    #[test]
    fn normalize_symlink_target_rejects_non_blob_paths() {
        assert!(normalize_symlink_target("./rpm_dir/foo.src.rpm").is_err());
        assert!(normalize_symlink_target("./blobs/sha256/not-hex").is_err());
    }
}
