//! Bundle a working directory into a `.tar.gz` snapshot.
//!
//! Entries are sorted by relative path and written with a fixed mode and a
//! zero mtime, so identical inputs give byte-identical archives.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::admin::short_alloc_id;
use crate::capture::error::CaptureError;

/// Archive file name for an allocation.
pub fn archive_name(alloc_id: &str) -> String {
    format!("{}_snapshot.tar.gz", short_alloc_id(alloc_id))
}

/// Write every file under `source` into the archive at `dest`.
///
/// Runs on the blocking pool. A partially written archive is removed.
pub async fn bundle(source: &Path, dest: &Path) -> Result<(), CaptureError> {
    let source = source.to_path_buf();
    let dest_path = dest.to_path_buf();

    let result = tokio::task::spawn_blocking(move || {
        let written = write_archive(&source, &dest_path);
        if written.is_err() {
            let _ = std::fs::remove_file(&dest_path);
        }
        written
    })
    .await;

    match result {
        Ok(Ok(count)) => {
            tracing::debug!("Archived {} file(s) into {}", count, dest.display());
            Ok(())
        }
        Ok(Err(e)) => Err(CaptureError::Archive {
            path: dest.to_path_buf(),
            reason: e.to_string(),
        }),
        Err(e) => Err(CaptureError::Archive {
            path: dest.to_path_buf(),
            reason: format!("archive task failed: {}", e),
        }),
    }
}

fn write_archive(source: &Path, dest: &Path) -> io::Result<usize> {
    let files = collect_files(source)?;

    let encoder = GzEncoder::new(File::create(dest)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (relative, path) in &files {
        let data = std::fs::read(path)?;
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder.append_data(&mut header, relative, &data[..])?;
    }
    builder.into_inner()?.finish()?;
    Ok(files.len())
}

/// Regular files under `root` as `(relative, absolute)` pairs, sorted.
fn collect_files(root: &Path) -> io::Result<Vec<(PathBuf, PathBuf)>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let relative = path
                    .strip_prefix(root)
                    .map_err(|e| io::Error::other(e.to_string()))?
                    .to_path_buf();
                files.push((relative, path));
            }
        }
    }
    files.sort();
    Ok(files)
}
