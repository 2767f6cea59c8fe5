//! Deterministic tar archives for copying files into containers.

use crate::CoreError;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Pack `root` into a tar archive, entries sorted by path.
///
/// A relative path is excluded when it equals an exclude pattern, lies below
/// one, or has a path component equal to one (so `node_modules` matches at
/// any depth). Timestamps and ownership are zeroed, so identical trees
/// produce identical archives.
pub fn pack_directory(root: &Path, exclude: &[String]) -> Result<Vec<u8>, CoreError> {
    if !root.is_dir() {
        return Err(CoreError::NotFound(format!(
            "repository directory {}",
            root.display()
        )));
    }

    let mut entries = Vec::new();
    collect_entries(root, root, exclude, &mut entries)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut ar = tar::Builder::new(Vec::new());
    ar.follow_symlinks(false);

    for (rel_path, full_path) in &entries {
        let ft = match full_path.symlink_metadata() {
            Ok(m) => m.file_type(),
            Err(e) => {
                warn!("skipping {rel_path}: metadata error: {e}");
                continue;
            }
        };

        if ft.is_file() {
            let data = fs::read(full_path)?;
            let mut header = make_header(full_path, tar::EntryType::Regular)?;
            header.set_size(data.len() as u64);
            header.set_cksum();
            ar.append_data(&mut header, rel_path, data.as_slice())?;
        } else if ft.is_dir() {
            let mut header = make_header(full_path, tar::EntryType::Directory)?;
            header.set_size(0);
            header.set_cksum();
            ar.append_data(&mut header, format!("{rel_path}/"), &[] as &[u8])?;
        } else if ft.is_symlink() {
            let target = fs::read_link(full_path)?;
            let mut header = make_header(full_path, tar::EntryType::Symlink)?;
            header.set_size(0);
            header.set_cksum();
            ar.append_link(&mut header, rel_path, &target)?;
        } else {
            warn!("skipping unsupported file type: {rel_path}");
        }
    }

    Ok(ar.into_inner()?)
}

/// A tar archive holding one regular file.
pub fn single_file(name: &str, data: &[u8], mode: u32) -> Result<Vec<u8>, CoreError> {
    let mut ar = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(mode);
    header.set_size(data.len() as u64);
    header.set_cksum();
    ar.append_data(&mut header, name, data)?;
    Ok(ar.into_inner()?)
}

fn is_excluded(rel_path: &str, exclude: &[String]) -> bool {
    exclude.iter().any(|pattern| {
        let pattern = pattern.trim_matches('/');
        !pattern.is_empty()
            && (rel_path == pattern
                || rel_path.starts_with(&format!("{pattern}/"))
                || rel_path.split('/').any(|c| c == pattern))
    })
}

fn collect_entries(
    root: &Path,
    current: &Path,
    exclude: &[String],
    out: &mut Vec<(String, PathBuf)>,
) -> Result<(), CoreError> {
    for entry in fs::read_dir(current)? {
        let full = entry?.path();
        let rel = full
            .strip_prefix(root)
            .map_err(|e| CoreError::Io(std::io::Error::other(format!("path strip: {e}"))))?
            .to_string_lossy()
            .replace('\\', "/");
        if is_excluded(&rel, exclude) {
            continue;
        }

        let is_dir = full.symlink_metadata()?.is_dir();
        out.push((rel, full.clone()));
        if is_dir {
            collect_entries(root, &full, exclude, out)?;
        }
    }
    Ok(())
}

fn make_header(full_path: &Path, entry_type: tar::EntryType) -> Result<tar::Header, CoreError> {
    let meta = full_path.symlink_metadata()?;
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(meta.permissions().mode());
    Ok(header)
}
