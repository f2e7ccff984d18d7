//! Plugin install sources (spec §4.H/§4.I), grounded in the teacher's
//! import pipeline: `install/openclaw/copy.rs`'s recursive copy-with-exclude
//! for directory sources, `extract::safe_extract_tgz`'s hardening for the
//! uploaded-archive path, and a plain shallow `git clone` via
//! `tokio::process::Command` for the git source. Exactly one variant backs
//! each builtin definition.

use std::path::{Path, PathBuf};

use pocketpaw_domain::{Error, Result};
use tokio::process::Command;

/// One file written verbatim when installing an inline builtin.
pub type InlineFile = (&'static str, &'static [u8]);

#[derive(Debug, Clone)]
pub enum InstallSource {
    /// Files baked into the binary at compile time.
    Inline(Vec<InlineFile>),
    /// Shallow `git clone`, `.git` stripped after clone.
    Git { url: String, rev: Option<String> },
    /// Recursive copy from an existing local directory (offline install).
    Dir(PathBuf),
    /// An uploaded `.tar.gz` archive, extracted with path-traversal and
    /// symlink guards.
    Archive(PathBuf),
}

/// Unpacks `source` into `dest` (already-validated, not yet created).
/// Destination is created fresh; callers are responsible for removing any
/// prior content first (install is "replace", not "merge").
pub async fn unpack(source: &InstallSource, dest: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dest).await?;

    match source {
        InstallSource::Inline(files) => {
            for (rel, bytes) in files {
                let path = dest.join(rel);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, bytes).await?;
            }
            Ok(())
        }

        InstallSource::Git { url, rev } => {
            let mut cmd = Command::new("git");
            cmd.arg("clone").arg("--depth").arg("1");
            if let Some(rev) = rev {
                cmd.arg("--branch").arg(rev);
            }
            cmd.arg(url).arg(dest);
            let status = cmd
                .status()
                .await
                .map_err(|e| Error::PluginInstallFailed(format!("git clone failed to spawn: {e}")))?;
            if !status.success() {
                return Err(Error::PluginInstallFailed(format!(
                    "git clone exited with {status}"
                )));
            }
            let git_dir = dest.join(".git");
            if git_dir.exists() {
                tokio::fs::remove_dir_all(&git_dir).await.ok();
            }
            Ok(())
        }

        InstallSource::Dir(src) => copy_dir_recursive(src, dest).await,

        InstallSource::Archive(archive_path) => {
            let archive_path = archive_path.clone();
            let dest = dest.to_path_buf();
            tokio::task::spawn_blocking(move || safe_extract_tgz(&archive_path, &dest))
                .await
                .map_err(|e| Error::PluginInstallFailed(format!("extract task panicked: {e}")))??;
            Ok(())
        }
    }
}

/// Recursive copy, skipping `.git` directories -- grounded in
/// `import/openclaw/copy.rs`'s exclusion-aware directory copy.
async fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    let mut stack = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        tokio::fs::create_dir_all(&to).await?;
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            if file_name == ".git" {
                continue;
            }
            let from_path = entry.path();
            let to_path = to.join(&file_name);
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push((from_path, to_path));
            } else if file_type.is_file() {
                tokio::fs::copy(&from_path, &to_path).await?;
            }
        }
    }
    Ok(())
}

/// Extracts a `.tar.gz` archive into `dest`, rejecting entries that would
/// escape `dest` via `..` path traversal or land outside it via an absolute
/// path or symlink. Synchronous -- run via `spawn_blocking`.
fn safe_extract_tgz(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive_path)?;
    let gz = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(gz);

    for entry in archive
        .entries()
        .map_err(|e| Error::PluginInstallFailed(format!("reading archive: {e}")))?
    {
        let mut entry =
            entry.map_err(|e| Error::PluginInstallFailed(format!("reading archive entry: {e}")))?;
        let entry_path = entry
            .path()
            .map_err(|e| Error::PluginInstallFailed(format!("entry path: {e}")))?
            .into_owned();

        if entry_path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir | std::path::Component::RootDir))
        {
            return Err(Error::PluginInstallFailed(format!(
                "archive entry escapes destination: {}",
                entry_path.display()
            )));
        }

        if entry.header().entry_type().is_symlink() || entry.header().entry_type().is_hard_link() {
            return Err(Error::PluginInstallFailed(format!(
                "archive entry is a link, refusing: {}",
                entry_path.display()
            )));
        }

        let out_path = dest.join(&entry_path);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry
            .unpack(&out_path)
            .map_err(|e| Error::PluginInstallFailed(format!("unpacking entry: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inline_writes_files_relative_to_dest() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("counter-template");
        let source = InstallSource::Inline(vec![
            ("pocketpaw.json", b"{}"),
            ("start.sh", b"#!/bin/sh\necho hi\n"),
        ]);
        unpack(&source, &dest).await.unwrap();
        assert!(dest.join("pocketpaw.json").exists());
        assert!(dest.join("start.sh").exists());
    }

    #[tokio::test]
    async fn dir_copy_excludes_git_directory() {
        let src_dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(src_dir.path().join(".git")).await.unwrap();
        tokio::fs::write(src_dir.path().join(".git/HEAD"), b"ref").await.unwrap();
        tokio::fs::write(src_dir.path().join("start.sh"), b"echo hi").await.unwrap();

        let dest_dir = tempfile::tempdir().unwrap();
        let dest = dest_dir.path().join("plugin");
        copy_dir_recursive(src_dir.path(), &dest).await.unwrap();

        assert!(dest.join("start.sh").exists());
        assert!(!dest.join(".git").exists());
    }

    #[test]
    fn safe_extract_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("evil.tar.gz");

        let file = std::fs::File::create(&archive_path).unwrap();
        let enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(enc);
        let data = b"pwned";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append_data(&mut header, "../../etc/evil", &data[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = dir.path().join("dest");
        let err = safe_extract_tgz(&archive_path, &dest);
        assert!(err.is_err());
    }
}
