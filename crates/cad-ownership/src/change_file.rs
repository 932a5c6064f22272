//! Streaming CSV parsing for ownership snapshot and change-only files.
//!
//! The read side only: no database writes here.  Callers hand the resulting
//! records to `cad_db::ownership` for persistence.
//!
//! ## Row contract
//!
//! Headers are matched case-insensitively and order-independently.  The only
//! required column is `Title Number`; change-only files additionally carry
//! `Change Indicator` (`A` = addition/update, `D` = deletion).  The final
//! `Row Count: N` sentinel row and any row missing its change indicator are
//! dropped.  Addresses are quoted CSV fields and may contain commas, hence
//! the `csv` crate rather than a hand-rolled splitter.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;

use cad_db::{OwnershipRecord, Proprietor};
use chrono::NaiveDate;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ChangeFileError {
    /// An I/O or CSV-library error.
    Io(String),
    /// The header row is missing a required column.
    MissingHeader(String),
}

impl fmt::Display for ChangeFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeFileError::Io(msg) => write!(f, "csv io error: {msg}"),
            ChangeFileError::MissingHeader(col) => {
                write!(f, "csv missing required header column: '{col}'")
            }
        }
    }
}

impl std::error::Error for ChangeFileError {}

// ---------------------------------------------------------------------------
// Header map
// ---------------------------------------------------------------------------

struct HeaderIndex(HashMap<String, usize>);

impl HeaderIndex {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let mut map = HashMap::new();
        for (i, name) in headers.iter().enumerate() {
            map.insert(name.trim().to_ascii_lowercase(), i);
        }
        Self(map)
    }

    fn get<'r>(&self, rec: &'r csv::StringRecord, name: &str) -> Option<&'r str> {
        let idx = *self.0.get(&name.to_ascii_lowercase())?;
        rec.get(idx).map(str::trim).filter(|s| !s.is_empty())
    }

    fn require(&self, name: &str) -> Result<(), ChangeFileError> {
        if self.0.contains_key(&name.to_ascii_lowercase()) {
            Ok(())
        } else {
            Err(ChangeFileError::MissingHeader(name.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Record assembly
// ---------------------------------------------------------------------------

fn is_row_count_sentinel(rec: &csv::StringRecord) -> bool {
    rec.get(0)
        .map(|f| f.trim_start().starts_with("Row Count"))
        .unwrap_or(false)
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%d-%m-%Y")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}

fn record_from_row(
    col: &HeaderIndex,
    rec: &csv::StringRecord,
    uk_based: bool,
) -> Option<OwnershipRecord> {
    let title_no = col.get(rec, "Title Number")?.to_string();

    let mut proprietors: [Option<Proprietor>; 4] = Default::default();
    for (slot, out) in proprietors.iter_mut().enumerate() {
        let n = slot + 1;
        let Some(name) = col.get(rec, &format!("Proprietor Name ({n})")) else {
            continue;
        };
        *out = Some(Proprietor {
            name: name.to_string(),
            company_no: col
                .get(rec, &format!("Company Registration No. ({n})"))
                .map(str::to_string),
            category: col
                .get(rec, &format!("Proprietorship Category ({n})"))
                .map(str::to_string),
            address_1: col
                .get(rec, &format!("Proprietor ({n}) Address (1)"))
                .map(str::to_string),
            address_2: col
                .get(rec, &format!("Proprietor ({n}) Address (2)"))
                .map(str::to_string),
            address_3: col
                .get(rec, &format!("Proprietor ({n}) Address (3)"))
                .map(str::to_string),
        });
    }

    Some(OwnershipRecord {
        title_no,
        tenure: col.get(rec, "Tenure").map(str::to_string),
        property_address: col.get(rec, "Property Address").map(str::to_string),
        postcode: col.get(rec, "Postcode").map(str::to_string),
        district: col.get(rec, "District").map(str::to_string),
        county: col.get(rec, "County").map(str::to_string),
        region: col.get(rec, "Region").map(str::to_string),
        price_paid: col.get(rec, "Price Paid").and_then(|s| s.parse().ok()),
        proprietors,
        date_proprietor_added: col.get(rec, "Date Proprietor Added").and_then(parse_date),
        uk_based,
    })
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Additions and deletions bucketed out of one change-only file.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub additions: Vec<OwnershipRecord>,
    pub deletions: Vec<String>,
    /// Rows dropped for a missing/unknown change indicator.
    pub skipped: u64,
}

/// Parse a change-only CSV: bucket rows by change indicator, drop the
/// `Row Count:` sentinel and rows without an indicator.
pub fn parse_change_file<R: Read>(reader: R, uk_based: bool) -> Result<ChangeSet, ChangeFileError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| ChangeFileError::Io(e.to_string()))?
        .clone();
    let col = HeaderIndex::from_headers(&headers);
    col.require("Title Number")?;
    col.require("Change Indicator")?;

    let mut out = ChangeSet::default();

    for rec in rdr.records() {
        let rec = rec.map_err(|e| ChangeFileError::Io(e.to_string()))?;
        if is_row_count_sentinel(&rec) {
            continue;
        }

        match col.get(&rec, "Change Indicator") {
            Some("A") => {
                if let Some(record) = record_from_row(&col, &rec, uk_based) {
                    out.additions.push(record);
                } else {
                    out.skipped += 1;
                }
            }
            Some("D") => {
                if let Some(title) = col.get(&rec, "Title Number") {
                    out.deletions.push(title.to_string());
                } else {
                    out.skipped += 1;
                }
            }
            // Missing or unknown indicator: data-row error, drop and carry on.
            _ => out.skipped += 1,
        }
    }

    Ok(out)
}

/// Stream a full-snapshot CSV through `sink`, returning the number of rows
/// delivered.  Snapshots are too large to buffer whole.
pub fn parse_snapshot_file<R: Read>(
    reader: R,
    uk_based: bool,
    mut sink: impl FnMut(OwnershipRecord) -> anyhow::Result<()>,
) -> Result<u64, ChangeFileError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| ChangeFileError::Io(e.to_string()))?
        .clone();
    let col = HeaderIndex::from_headers(&headers);
    col.require("Title Number")?;

    let mut delivered = 0u64;
    for rec in rdr.records() {
        let rec = rec.map_err(|e| ChangeFileError::Io(e.to_string()))?;
        if is_row_count_sentinel(&rec) {
            continue;
        }
        if let Some(record) = record_from_row(&col, &rec, uk_based) {
            sink(record).map_err(|e| ChangeFileError::Io(e.to_string()))?;
            delivered += 1;
        }
    }

    Ok(delivered)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Title Number,Tenure,Property Address,District,County,Region,Postcode,\
Price Paid,Proprietor Name (1),Company Registration No. (1),Proprietorship Category (1),\
Proprietor (1) Address (1),Proprietor (1) Address (2),Proprietor (1) Address (3),\
Proprietor Name (2),Company Registration No. (2),Proprietorship Category (2),\
Proprietor (2) Address (1),Proprietor (2) Address (2),Proprietor (2) Address (3),\
Date Proprietor Added,Change Indicator,Change Date";

    fn row(title: &str, indicator: &str) -> String {
        format!(
            "{title},Freehold,\"1 High Street, Leeds\",Leeds,West Yorkshire,Yorkshire,LS1 1AA,\
250000,ACME PROPERTY LTD,01234567,Limited Company or Public Limited Company,\
\"2 Corporate Way, Leeds\",,,,,,,,,03-05-2021,{indicator},01-06-2021"
        )
    }

    #[test]
    fn additions_and_deletions_bucketed() {
        let csv = format!(
            "{HEADER}\n{}\n{}\n{}",
            row("AB123", "A"),
            row("CD456", "D"),
            row("EF789", "A"),
        );
        let set = parse_change_file(csv.as_bytes(), true).unwrap();
        assert_eq!(set.additions.len(), 2);
        assert_eq!(set.deletions, vec!["CD456".to_string()]);
        assert_eq!(set.skipped, 0);

        let first = &set.additions[0];
        assert_eq!(first.title_no, "AB123");
        assert_eq!(first.tenure.as_deref(), Some("Freehold"));
        assert_eq!(first.property_address.as_deref(), Some("1 High Street, Leeds"));
        assert_eq!(first.price_paid, Some(250_000));
        assert!(first.uk_based);

        let p1 = first.proprietors[0].as_ref().unwrap();
        assert_eq!(p1.name, "ACME PROPERTY LTD");
        assert_eq!(p1.company_no.as_deref(), Some("01234567"));
        assert!(first.proprietors[1].is_none());

        assert_eq!(
            first.date_proprietor_added,
            NaiveDate::from_ymd_opt(2021, 5, 3)
        );
    }

    #[test]
    fn row_count_sentinel_dropped() {
        let csv = format!("{HEADER}\n{}\nRow Count: 1", row("AB123", "A"));
        let set = parse_change_file(csv.as_bytes(), true).unwrap();
        assert_eq!(set.additions.len(), 1);
        assert_eq!(set.skipped, 0);
    }

    #[test]
    fn missing_change_indicator_skipped() {
        let csv = format!(
            "{HEADER}\n{}\n{}",
            row("AB123", ""),
            row("CD456", "A"),
        );
        let set = parse_change_file(csv.as_bytes(), true).unwrap();
        assert_eq!(set.additions.len(), 1);
        assert_eq!(set.additions[0].title_no, "CD456");
        assert_eq!(set.skipped, 1);
    }

    #[test]
    fn unknown_indicator_skipped() {
        let csv = format!("{HEADER}\n{}", row("AB123", "X"));
        let set = parse_change_file(csv.as_bytes(), true).unwrap();
        assert!(set.additions.is_empty());
        assert!(set.deletions.is_empty());
        assert_eq!(set.skipped, 1);
    }

    #[test]
    fn change_file_requires_indicator_column() {
        let header_without = HEADER.replace(",Change Indicator", "");
        let err = parse_change_file(header_without.as_bytes(), true).unwrap_err();
        assert!(matches!(err, ChangeFileError::MissingHeader(_)));
    }

    #[test]
    fn snapshot_streams_rows_without_indicator_column() {
        let header = HEADER.replace(",Change Indicator,Change Date", "");
        let body = row("AB123", "A");
        // Strip the trailing indicator fields to match the reduced header.
        let body = body.rsplitn(3, ',').nth(2).unwrap().to_string();
        let csv = format!("{header}\n{body}\nRow Count: 1");

        let mut seen = Vec::new();
        let n = parse_snapshot_file(csv.as_bytes(), false, |r| {
            seen.push(r.title_no.clone());
            Ok(())
        })
        .unwrap();
        assert_eq!(n, 1);
        assert_eq!(seen, vec!["AB123".to_string()]);
    }

    #[test]
    fn ocod_rows_are_not_uk_based() {
        let csv = format!("{HEADER}\n{}", row("OC999", "A"));
        let set = parse_change_file(csv.as_bytes(), false).unwrap();
        assert!(!set.additions[0].uk_based);
    }

    #[test]
    fn iso_dates_also_accepted() {
        assert_eq!(parse_date("2021-05-03"), NaiveDate::from_ymd_opt(2021, 5, 3));
        assert_eq!(parse_date("03-05-2021"), NaiveDate::from_ymd_opt(2021, 5, 3));
        assert_eq!(parse_date("garbage"), None);
    }
}
