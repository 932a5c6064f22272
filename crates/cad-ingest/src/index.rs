//! The public archive index: one zipped GML link per council on a
//! human-oriented HTML page.

use crate::IngestError;

/// One council's downloadable archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouncilArchive {
    /// Human-readable council name derived from the archive filename
    /// (underscores become spaces).
    pub council: String,
    /// Absolute download URL.
    pub url: String,
}

impl CouncilArchive {
    /// Filesystem-safe filename for the saved archive.
    pub fn zip_name(&self) -> String {
        format!("{}.zip", self.council.replace(' ', "_"))
    }

    /// Filename of the transformed GeoJSON.
    pub fn geojson_name(&self) -> String {
        format!("{}.geojson", self.council.replace(' ', "_"))
    }
}

/// Extract every `.zip` link from the index HTML, resolve it against
/// `base_url`, and return the councils sorted alphabetically.
///
/// The page is human-oriented and changes cosmetically; scanning `href`
/// attributes for zip targets has outlived several redesigns, so no HTML
/// parser dependency is carried for this.
pub fn parse_archive_index(html: &str, base_url: &str) -> Result<Vec<CouncilArchive>, IngestError> {
    let mut out: Vec<CouncilArchive> = Vec::new();

    for chunk in html.split("href=").skip(1) {
        let rest = chunk.trim_start();
        let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            continue;
        };
        let rest = &rest[1..];
        let Some(end) = rest.find(quote) else { continue };
        let link = &rest[..end];
        if !link.to_ascii_lowercase().ends_with(".zip") {
            continue;
        }

        let file_stem = link
            .rsplit('/')
            .next()
            .unwrap_or(link)
            .trim_end_matches(".zip")
            .trim_end_matches(".ZIP");
        if file_stem.is_empty() {
            continue;
        }

        let council = file_stem.replace('_', " ");
        let url = if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else {
            format!("{}/{}", base_url.trim_end_matches('/'), link.trim_start_matches('/'))
        };

        if out.iter().any(|c| c.council == council) {
            continue;
        }
        out.push(CouncilArchive { council, url });
    }

    if out.is_empty() {
        return Err(IngestError::Index("no council archives found on index page".to_string()));
    }

    out.sort_by(|a, b| a.council.cmp(&b.council));
    Ok(out)
}
