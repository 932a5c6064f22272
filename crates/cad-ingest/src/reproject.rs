//! GML → WGS84 GeoJSON reprojection via the external geospatial toolchain.
//!
//! The core owns the input/output filenames; the transform itself is
//! delegated to `ogr2ogr`, which reads the GML's declared CRS.  Detection is
//! limited to non-zero exit and an implausibly small output file.

use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

use crate::IngestError;

/// Output files smaller than this cannot be a council's parcel set.
const MIN_PLAUSIBLE_OUTPUT_BYTES: u64 = 10 * 1024;

/// Reproject `gml_path` into `geojson_path` (EPSG:4326).
pub async fn reproject_to_wgs84(gml_path: &Path, geojson_path: &Path) -> Result<(), IngestError> {
    if let Some(parent) = geojson_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    // ogr2ogr refuses to overwrite without -overwrite; a stale partial output
    // from a crashed run must not survive either way.
    let _ = tokio::fs::remove_file(geojson_path).await;

    debug!(gml = %gml_path.display(), out = %geojson_path.display(), "reprojecting");

    let output = Command::new("ogr2ogr")
        .arg("-f")
        .arg("GeoJSON")
        .arg("-t_srs")
        .arg("EPSG:4326")
        .arg(geojson_path)
        .arg(gml_path)
        .output()
        .await
        .map_err(|e| IngestError::Reproject(format!("spawn ogr2ogr: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IngestError::Reproject(format!(
            "ogr2ogr exited {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let size = tokio::fs::metadata(geojson_path)
        .await
        .map_err(|e| IngestError::Reproject(format!("stat output: {e}")))?
        .len();
    if size < MIN_PLAUSIBLE_OUTPUT_BYTES {
        return Err(IngestError::ImplausibleOutput {
            path: geojson_path.display().to_string(),
            size,
        });
    }

    info!(out = %geojson_path.display(), bytes = size, "reprojection complete");
    Ok(())
}
