//! Zip extraction for council archives.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::IngestError;

/// Extract the first `.gml` entry of `zip_path` into `dest_dir`, returning
/// the extracted file's path.
///
/// Council archives carry exactly one GML plus licence/readme noise; a
/// truncated or GML-less archive is a task-scope error.
pub fn extract_gml(zip_path: &Path, dest_dir: &Path) -> Result<PathBuf, IngestError> {
    let file = File::open(zip_path)
        .map_err(|e| IngestError::Archive(format!("open {}: {e}", zip_path.display())))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| IngestError::Archive(format!("read {}: {e}", zip_path.display())))?;

    let gml_index = (0..archive.len())
        .find(|&i| {
            archive
                .by_index(i)
                .map(|entry| entry.name().to_ascii_lowercase().ends_with(".gml"))
                .unwrap_or(false)
        })
        .ok_or_else(|| {
            IngestError::Archive(format!("no .gml entry in {}", zip_path.display()))
        })?;

    std::fs::create_dir_all(dest_dir)?;

    let mut entry = archive
        .by_index(gml_index)
        .map_err(|e| IngestError::Archive(e.to_string()))?;
    // Flatten any internal directory structure; only the file matters.
    let name = entry
        .name()
        .rsplit('/')
        .next()
        .unwrap_or("parcels.gml")
        .to_string();
    let out_path = dest_dir.join(name);

    let mut out = File::create(&out_path)
        .map_err(|e| IngestError::Archive(format!("create {}: {e}", out_path.display())))?;
    io::copy(&mut entry, &mut out)
        .map_err(|e| IngestError::Archive(format!("extract {}: {e}", zip_path.display())))?;

    Ok(out_path)
}
