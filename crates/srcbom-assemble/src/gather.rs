//! Source Gatherer (C5): produce the `rpm_dir`/`extra_src_dir` driver
//! directories the external layer builder reads from — one tar.gz of the
//! app source checkout, plus a walk of a prefetch ("cachi2") output tree.
//! Grounded on `source_build.py`'s `make_source_archive` and
//! `gather_prefetched_sources`.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use snafu::{ensure, ResultExt};
use walkdir::WalkDir;

use crate::error::{
    CopySnafu, CreateDirSnafu, NonZeroExitSnafu, NotAGitRepoSnafu, ReadSnafu, Result, SpawnSnafu,
    WalkDirSnafu,
};

/// Content types `filetype`/`infer` report for the archive formats the
/// prefetch walk treats as an extra source (§4.5).
const ARCHIVE_MIME_TYPES: &[&str] = &[
    "application/gzip",
    "application/x-bzip2",
    "application/x-compress",
    "application/x-tar",
    "application/x-xz",
    "application/zip",
];

const SRPM_MIME_TYPE: &str = "application/x-rpm";

/// Accumulates the driver directories fed to the external layer builder
/// (`-s <rpm_dir>`, repeated `-e <dir>`), built up across app-source and
/// prefetch gathering.
#[derive(Debug, Clone, Default)]
pub struct GatherDirs {
    pub rpm_dir: Option<PathBuf>,
    pub extra_src_dirs: Vec<PathBuf>,
}

impl GatherDirs {
    pub fn new() -> Self {
        Self::default()
    }

    fn rpm_dir_or_create(&mut self, work_dir: &Path) -> Result<PathBuf> {
        if let Some(dir) = &self.rpm_dir {
            return Ok(dir.clone());
        }
        let dir = create_dir(work_dir, "rpm_dir")?;
        self.rpm_dir = Some(dir.clone());
        Ok(dir)
    }
}

fn create_dir(base: &Path, name: &str) -> Result<PathBuf> {
    let path = base.join(name);
    fs::create_dir_all(&path).context(CreateDirSnafu { path: path.clone() })?;
    Ok(path)
}

fn run_checked(tool: &str, args: &[&str], cwd: &Path) -> Result<std::process::Output> {
    tracing::debug!(component = "gather", tool, ?args, "invoking");
    let output = duct::cmd(tool, args.iter().copied())
        .dir(cwd)
        .unchecked()
        .stdout_capture()
        .stderr_capture()
        .run()
        .context(SpawnSnafu { tool: tool.to_string() })?;
    ensure!(
        output.status.success(),
        NonZeroExitSnafu {
            tool: tool.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    );
    Ok(output)
}

/// `git rev-parse HEAD` and `git config --get remote.origin.url`, reduced
/// to the repo name (last path segment, extension stripped) and HEAD's
/// commit sha, mirroring `get_repo_info`.
fn repo_name_and_sha(source_dir: &Path) -> Result<(String, String)> {
    let sha_out = run_checked("git", &["rev-parse", "HEAD"], source_dir)?;
    let sha = String::from_utf8_lossy(&sha_out.stdout).trim().to_string();
    ensure!(!sha.is_empty(), NotAGitRepoSnafu { path: source_dir.to_path_buf() });

    let url_out = run_checked("git", &["config", "--get", "remote.origin.url"], source_dir)?;
    let url = String::from_utf8_lossy(&url_out.stdout)
        .trim()
        .trim_end_matches('/')
        .to_string();
    let last_segment = url.rsplit('/').next().unwrap_or(&url);
    let name = splitext_root(last_segment).to_string();

    Ok((name, sha))
}

/// Python's `os.path.splitext` keeps the root before the *last* dot, except
/// a leading dot (hidden files have no extension).
fn splitext_root(s: &str) -> &str {
    match s.rfind('.') {
        Some(0) | None => s,
        Some(i) => &s[..i],
    }
}

/// **Application source** (§4.5): tar.gz rooted at `<repo-name>-<sha>/`,
/// entry mtimes set to `HEAD`'s commit timestamp, uncommitted changes set
/// aside with `git stash` and restored afterwards. Appends the archive's
/// containing directory to `dirs.extra_src_dirs`.
pub fn gather_app_source(work_dir: &Path, source_dir: &Path, dirs: &mut GatherDirs) -> Result<()> {
    let archive_dir = create_dir(work_dir, "source_archive")?;
    let (name, sha) = repo_name_and_sha(source_dir)?;
    let name_sha = format!("{name}-{sha}");
    let output_archive = archive_dir.join(format!("{name_sha}.tar.gz"));

    run_checked("git", &["stash"], source_dir)?;

    let mtime_out = run_checked("git", &["show", "-s", "--format=%cI"], source_dir);
    // `git stash pop` must run even if the steps in between failed, or a
    // clean checkout is left dirtied by a stash that never comes back.
    let mtime_out = match mtime_out {
        Ok(out) => out,
        Err(e) => {
            let _ = duct::cmd("git", ["stash", "pop"]).dir(source_dir).unchecked().run();
            return Err(e);
        }
    };
    let mtime = String::from_utf8_lossy(&mtime_out.stdout).trim().to_string();

    let ls_files = match run_checked("git", &["ls-files", "--recurse-submodules"], source_dir) {
        Ok(out) => out,
        Err(e) => {
            let _ = duct::cmd("git", ["stash", "pop"]).dir(source_dir).unchecked().run();
            return Err(e);
        }
    };

    let tar_result = duct::cmd(
        "tar",
        [
            "caf",
            &output_archive.display().to_string(),
            "--mtime",
            &mtime,
            "--transform",
            &format!("s,^,{name_sha}/,"),
            "-T-",
        ],
    )
    .dir(source_dir)
    .stdin_bytes(ls_files.stdout)
    .unchecked()
    .stdout_capture()
    .stderr_capture()
    .run()
    .context(SpawnSnafu { tool: "tar".to_string() });

    // `git stash pop` runs unconditionally (matching the original script,
    // which does not check its exit status): a clean tree had nothing
    // stashed and `pop` failing there is expected, not an error.
    let _ = duct::cmd("git", ["stash", "pop"]).dir(source_dir).unchecked().run();

    let tar_output = tar_result?;
    ensure!(
        tar_output.status.success(),
        NonZeroExitSnafu {
            tool: "tar".to_string(),
            stderr: String::from_utf8_lossy(&tar_output.stderr).into_owned(),
        }
    );

    dirs.extra_src_dirs.push(archive_dir);
    Ok(())
}

fn sha256_hex_of_file(path: &Path) -> Result<String> {
    let content = fs::read(path).context(ReadSnafu { path: path.to_path_buf() })?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(base16::encode_lower(&hasher.finalize()))
}

/// **Prefetch tree** (§4.5): walk `<cachi2-dir>/output/` in path-sorted
/// order, classifying members by content-type (not extension) exactly as
/// `filetype.guess_mime` did in the original script.
pub fn gather_prefetched_sources(work_dir: &Path, cachi2_dir: &Path, dirs: &mut GatherDirs) -> Result<bool> {
    let output_dir = cachi2_dir.join("output");
    if !output_dir.is_dir() {
        tracing::info!(component = "gather", path = %output_dir.display(), "no cachi2 output directory");
        return Ok(false);
    }

    let prepared_dir = create_dir(work_dir, "prefetched_sources")?;

    let mut source_count = 0usize;
    let mut srpm_count = 0usize;

    for entry in WalkDir::new(&output_dir).sort_by_file_name() {
        let entry = entry.context(WalkDirSnafu { path: output_dir.clone() })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(kind) = infer::get_from_path(path).context(ReadSnafu { path: path.to_path_buf() })? else {
            continue;
        };
        let mime = kind.mime_type();
        let filename = entry.file_name().to_string_lossy();

        if filename.ends_with(".src.rpm") && mime == SRPM_MIME_TYPE {
            let rpm_dir = dirs.rpm_dir_or_create(work_dir)?;
            let mut dest = rpm_dir.join(filename.as_ref());
            if dest.is_file() {
                let src_hash = sha256_hex_of_file(path)?;
                let dest_hash = sha256_hex_of_file(&dest)?;
                if src_hash == dest_hash {
                    tracing::debug!(component = "gather", file = %filename, "identical srpm already gathered, skipping");
                    continue;
                }
                dest = rpm_dir.join(format!("{src_hash}-{filename}"));
            }
            fs::copy(path, &dest).context(CopySnafu {
                src: path.to_path_buf(),
                dest: dest.clone(),
            })?;
            srpm_count += 1;
        } else if ARCHIVE_MIME_TYPES.contains(&mime) {
            let relative = path.strip_prefix(&output_dir).unwrap_or(path);
            let src_dir = format!("src-{source_count}");
            let dest_dir = prepared_dir.join(&src_dir).join(relative.parent().unwrap_or(Path::new("")));
            fs::create_dir_all(&dest_dir).context(CreateDirSnafu { path: dest_dir.clone() })?;
            let dest = dest_dir.join(filename.as_ref());
            fs::copy(path, &dest).context(CopySnafu {
                src: path.to_path_buf(),
                dest,
            })?;
            dirs.extra_src_dirs.push(prepared_dir.join(&src_dir));
            source_count += 1;
        }
    }

    let gathered = source_count + srpm_count > 0;
    if !gathered {
        tracing::info!(component = "gather", "no prefetched source archive found");
    }

    let cachi2_env = cachi2_dir.join("cachi2.env");
    if cachi2_env.is_file() {
        let env_dir = create_dir(work_dir, "cachi2_env")?;
        let dest = env_dir.join("cachi2.env");
        fs::copy(&cachi2_env, &dest).context(CopySnafu { src: cachi2_env, dest })?;
        dirs.extra_src_dirs.push(env_dir);
    }

    Ok(gathered)
}
