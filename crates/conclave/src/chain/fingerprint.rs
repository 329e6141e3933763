//! Directory fingerprinting.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;

use conclave_common::constants::DEFAULT_CHAIN;

use crate::config::FingerprintMode;

/// Fingerprint `base_dir`.
///
/// Returns [`DEFAULT_CHAIN`] when the tree holds no non-directory entries.
/// Any I/O error aborts the whole fingerprint so a partial walk never
/// reaches the chain.
pub fn fingerprint(base_dir: &Path, mode: FingerprintMode) -> io::Result<String> {
    match mode {
        FingerprintMode::Paths => path_fingerprint(base_dir),
        FingerprintMode::Content => content_fingerprint(base_dir),
    }
}

/// Streaming SHA-256 over the path string of every non-directory entry,
/// in the order the filesystem yields them.
fn path_fingerprint(base_dir: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut found = false;

    walk(base_dir, &mut |path| {
        // Raw bytes so distinct non-UTF-8 names never collide
        hasher.update(path.as_os_str().as_encoded_bytes());
        found = true;
    })?;

    if !found {
        return Ok(DEFAULT_CHAIN.to_string());
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Pre-order walk. Symlinks to directories are neither hashed nor followed.
fn walk(dir: &Path, visit: &mut dyn FnMut(&Path)) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk(&path, visit)?;
        } else if !path.is_dir() {
            visit(&path);
        }
    }
    Ok(())
}

fn content_fingerprint(base_dir: &Path) -> io::Result<String> {
    let meta = fs::metadata(base_dir)?;
    if !meta.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a directory", base_dir.display()),
        ));
    }

    let mut files = 0usize;
    let root = dir_digest(base_dir, ".", &mut files)?;
    if files == 0 {
        return Ok(DEFAULT_CHAIN.to_string());
    }
    Ok(hex::encode(root))
}

/// H("DIR" || rel || child_count_be64 || for each child: child_rel || child_hash),
/// children sorted by name. Symlinks to directories are skipped as in `walk`.
fn dir_digest(abs: &Path, rel: &str, files: &mut usize) -> io::Result<[u8; 32]> {
    let mut entries = fs::read_dir(abs)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut children = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let child_rel = if rel == "." {
            name
        } else {
            format!("{}/{}", rel, name)
        };
        let child_abs = entry.path();

        let hash = if entry.file_type()?.is_dir() {
            dir_digest(&child_abs, &child_rel, files)?
        } else if child_abs.is_dir() {
            // symlinked directory
            continue;
        } else {
            *files += 1;
            file_digest(&child_abs, &child_rel)?
        };
        children.push((child_rel, hash));
    }

    let mut hasher = Sha256::new();
    hasher.update(b"DIR");
    hasher.update(rel.as_bytes());
    hasher.update((children.len() as u64).to_be_bytes());
    for (child_rel, hash) in &children {
        hasher.update(child_rel.as_bytes());
        hasher.update(hash);
    }
    Ok(hasher.finalize().into())
}

/// H("FILE" || rel || size_be64 || contents)
fn file_digest(abs: &Path, rel: &str) -> io::Result<[u8; 32]> {
    let data = fs::read(abs)?;
    let mut hasher = Sha256::new();
    hasher.update(b"FILE");
    hasher.update(rel.as_bytes());
    hasher.update((data.len() as u64).to_be_bytes());
    hasher.update(&data);
    Ok(hasher.finalize().into())
}
