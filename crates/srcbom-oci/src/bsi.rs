//! Interpret a layer tarball produced by the external "BSI" (build source
//! image) layer builder (§4.3). Every such layer is a gzip-compressed tar
//! holding exactly one regular blob member and one symlink pointing at it;
//! the symlink's location tells us what kind of source it carries.

use std::io::{Cursor, Read};

use regex::Regex;
use snafu::{ensure, OptionExt, ResultExt};
use tar::{Archive, EntryType};

use crate::error::{
    BadSymlinkTargetSnafu, EmptyExtraSourceSnafu, MissingMemberSnafu, Result, TarSnafu,
};
use crate::layout::normalize_symlink_target;

fn blob_member_re() -> Regex {
    Regex::new(r"^\./blobs/sha256/[0-9a-f]+$").expect("static regex")
}

fn rpm_symlink_re() -> Regex {
    Regex::new(r"^\./rpm_dir/.*\.src\.rpm$").expect("static regex")
}

fn extra_src_symlink_re() -> Regex {
    Regex::new(r"^\./extra_src_dir/extra-src-[0-9a-f]+\.tar$").expect("static regex")
}

/// The identity of a BSI layer: equal iff `(blob_member_path, artefact_name)`
/// match, independent of the layer's own digest (§4.3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BsiIdentity {
    pub blob_member_path: String,
    pub artefact_name: String,
}

/// Open a layer's gzip+tar content and derive its `BsiIdentity`.
pub fn inspect_layer<R: Read>(reader: R) -> Result<BsiIdentity> {
    let blob_re = blob_member_re();
    let rpm_re = rpm_symlink_re();
    let extra_re = extra_src_symlink_re();

    let decoder = flate2::read::GzDecoder::new(reader);
    let mut archive = Archive::new(decoder);

    let mut blob_member: Option<(String, Vec<u8>)> = None;
    let mut symlink_member: Option<(String, String)> = None;

    for entry in archive.entries().context(TarSnafu)? {
        let mut entry = entry.context(TarSnafu)?;
        let path = normalize_member_path(&entry.path().context(TarSnafu)?.to_string_lossy());
        match entry.header().entry_type() {
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .context(TarSnafu)?
                    .context(MissingMemberSnafu {
                        what: "symlink target",
                    })?
                    .to_string_lossy()
                    .into_owned();
                symlink_member = Some((path, link));
            }
            EntryType::Regular if blob_re.is_match(&path) => {
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf).context(TarSnafu)?;
                blob_member = Some((path, buf));
            }
            _ => {}
        }
    }

    let (blob_path, blob_content) = blob_member.context(MissingMemberSnafu {
        what: "blob member",
    })?;
    let (symlink_path, link_target) = symlink_member.context(MissingMemberSnafu {
        what: "symlink member",
    })?;

    let normalized_target = normalize_symlink_target(&link_target)?;
    ensure!(
        normalized_target == blob_path,
        BadSymlinkTargetSnafu {
            target: link_target,
        }
    );

    let artefact_name = if rpm_re.is_match(&symlink_path) {
        symlink_path
            .rsplit('/')
            .next()
            .unwrap_or(&symlink_path)
            .to_string()
    } else if extra_re.is_match(&symlink_path) {
        first_regular_member_name(&blob_content)?
    } else {
        return MissingMemberSnafu {
            what: "a symlink under rpm_dir/ or extra_src_dir/",
        }
        .fail();
    };

    Ok(BsiIdentity {
        blob_member_path: blob_path,
        artefact_name,
    })
}

fn first_regular_member_name(tar_content: &[u8]) -> Result<String> {
    let mut archive = Archive::new(Cursor::new(tar_content));
    for entry in archive.entries().context(TarSnafu)? {
        let entry = entry.context(TarSnafu)?;
        if entry.header().entry_type() == EntryType::Regular {
            return Ok(entry.path().context(TarSnafu)?.to_string_lossy().into_owned());
        }
    }
    EmptyExtraSourceSnafu.fail()
}

fn normalize_member_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("./") {
        format!("./{rest}")
    } else if let Some(rest) = path.strip_prefix('/') {
        format!("./{rest}")
    } else {
        format!("./{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gzip_tar(entries: &[(&str, tar::EntryType, &[u8], Option<&str>)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, ty, content, link) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_entry_type(*ty);
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            if let Some(link) = link {
                header.set_link_name(link).unwrap();
            }
            header.set_cksum();
            builder.append(&header, *content).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn rpm_symlink_identity() {
        let digest = "a".repeat(64);
        let blob_path = format!("./blobs/sha256/{digest}");
        let gz = gzip_tar(&[
            (&blob_path, tar::EntryType::Regular, b"rpm-bytes", None),
            (
                "./rpm_dir/foo-1.0-1.src.rpm",
                tar::EntryType::Symlink,
                b"",
                Some(&blob_path),
            ),
        ]);
        let identity = inspect_layer(Cursor::new(gz)).unwrap();
        assert_eq!(identity.blob_member_path, blob_path);
        assert_eq!(identity.artefact_name, "foo-1.0-1.src.rpm");
    }

    #[test]
    fn extra_src_symlink_identity_opens_nested_tar() {
        let inner = gzip_tar(&[("source-1.2.3.tar.gz", tar::EntryType::Regular, b"abc", None)]);
        // the outer blob holds a *plain* (uncompressed) nested tar per spec;
        // reuse gzip_tar's tar-building half only.
        let mut inner_tar = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_path("source-1.2.3.tar.gz").unwrap();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(3);
        header.set_mode(0o644);
        header.set_cksum();
        inner_tar.append(&header, &b"abc"[..]).unwrap();
        let inner_bytes = inner_tar.into_inner().unwrap();
        let _ = inner; // keep gzip_tar's codegen exercised elsewhere

        let digest = "b".repeat(64);
        let blob_path = format!("./blobs/sha256/{digest}");
        let gz = {
            let mut builder = tar::Builder::new(Vec::new());
            let mut h1 = tar::Header::new_gnu();
            h1.set_path(&blob_path).unwrap();
            h1.set_entry_type(tar::EntryType::Regular);
            h1.set_size(inner_bytes.len() as u64);
            h1.set_mode(0o644);
            h1.set_cksum();
            builder.append(&h1, inner_bytes.as_slice()).unwrap();

            let mut h2 = tar::Header::new_gnu();
            h2.set_path("./extra_src_dir/extra-src-deadbeef.tar").unwrap();
            h2.set_entry_type(tar::EntryType::Symlink);
            h2.set_size(0);
            h2.set_mode(0o644);
            h2.set_link_name(&blob_path).unwrap();
            h2.set_cksum();
            builder.append(&h2, &b""[..]).unwrap();

            let tar_bytes = builder.into_inner().unwrap();
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&tar_bytes).unwrap();
            encoder.finish().unwrap()
        };

        let identity = inspect_layer(Cursor::new(gz)).unwrap();
        assert_eq!(identity.blob_member_path, blob_path);
        assert_eq!(identity.artefact_name, "source-1.2.3.tar.gz");
    }

    #[test]
    fn mismatched_symlink_target_is_rejected() {
        let digest = "c".repeat(64);
        let blob_path = format!("./blobs/sha256/{digest}");
        let gz = gzip_tar(&[
            (&blob_path, tar::EntryType::Regular, b"x", None),
            (
                "./rpm_dir/foo.src.rpm",
                tar::EntryType::Symlink,
                b"",
                Some("./blobs/sha256/deadbeef"),
            ),
        ]);
        assert!(inspect_layer(Cursor::new(gz)).is_err());
    }
}
