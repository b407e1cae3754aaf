//! Table ingestion
//!
//! Reads the upload converter's split-orient JSON table:
//!
//! ```json
//! {
//!   "columns": ["age", "city"],
//!   "data": [[34, "Oslo"], [null, "Lima"]],
//!   "dtypes": {"age": "float64", "city": "object"}
//! }
//! ```
//!
//! Input may be zstd- or gzip-compressed (`*.json.gz`); the magic bytes are
//! detected automatically. Files are memory-mapped rather than read into a
//! buffer.
//!
//! The converter writes date columns as compact `%Y%m%d%H%M%S` strings under
//! dtype `object`. An `object` column whose every value has that shape is
//! declared a timestamp column.

use crate::column_store::{is_compact_timestamp, Dataset, RawValue, SemanticType};
use crate::{InsightError, Result};
use flate2::read::GzDecoder;
use log::debug;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// zstd frame magic number (little-endian 0xFD2FB528)
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// gzip member header (RFC 1952 ID1 ID2)
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Header plus positional rows, with optional per-column dtype names
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub data: Vec<Vec<RawValue>>,
    #[serde(default)]
    pub dtypes: HashMap<String, String>,
}

/// Map a dataframe dtype name onto a semantic type.
///
/// `None` means the column type is inferred from its values.
pub fn dtype_to_semantic(dtype: &str) -> Option<SemanticType> {
    let dtype = dtype.trim().to_ascii_lowercase();
    if dtype.starts_with("int") || dtype.starts_with("uint") {
        Some(SemanticType::Integer)
    } else if dtype.starts_with("float") {
        Some(SemanticType::Float)
    } else if dtype == "bool" || dtype == "boolean" {
        Some(SemanticType::Boolean)
    } else if dtype.starts_with("datetime64") {
        Some(SemanticType::Timestamp)
    } else if dtype == "category" || dtype == "string" {
        Some(SemanticType::Text)
    } else {
        None
    }
}

impl RawTable {
    /// Parse a table from plain, zstd- or gzip-compressed JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let json: Cow<[u8]> = if bytes.starts_with(&ZSTD_MAGIC) {
            let decoded = zstd::decode_all(bytes)?;
            debug!("zstd input: {} -> {} bytes", bytes.len(), decoded.len());
            Cow::Owned(decoded)
        } else if bytes.starts_with(&GZIP_MAGIC) {
            let mut decoded = Vec::with_capacity(bytes.len() * 4);
            GzDecoder::new(bytes).read_to_end(&mut decoded)?;
            debug!("gzip input: {} -> {} bytes", bytes.len(), decoded.len());
            Cow::Owned(decoded)
        } else {
            Cow::Borrowed(bytes)
        };
        Ok(serde_json::from_slice(&json)?)
    }

    /// Memory-map and parse a table file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        if file.metadata()?.len() == 0 {
            return Err(InsightError::SchemaError(format!(
                "{} is empty",
                path.as_ref().display()
            )));
        }
        // The mapping is read-only and dropped before this function returns
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_slice(&mmap[..])
    }

    /// Declared types for every column whose dtype maps onto one, plus
    /// `object` columns holding only compact timestamps
    pub fn declared_types(&self) -> HashMap<String, SemanticType> {
        self.dtypes
            .iter()
            .filter_map(|(name, dtype)| {
                let ty = dtype_to_semantic(dtype).or_else(|| {
                    (dtype.trim() == "object" && self.holds_compact_timestamps(name))
                        .then_some(SemanticType::Timestamp)
                })?;
                Some((name.clone(), ty))
            })
            .collect()
    }

    /// At least one value, and every non-null value is compact timestamp text
    fn holds_compact_timestamps(&self, column: &str) -> bool {
        let Some(idx) = self.columns.iter().position(|c| c == column) else {
            return false;
        };
        let mut seen = false;
        for value in self.data.iter().filter_map(|row| row.get(idx)) {
            match value {
                RawValue::Null => {}
                RawValue::Text(s) if is_compact_timestamp(s) => seen = true,
                _ => return false,
            }
        }
        seen
    }

    pub fn row_count(&self) -> usize {
        self.data.len()
    }

    pub fn into_dataset(self) -> Result<Dataset> {
        let declared = self.declared_types();
        Dataset::from_records(self.columns, self.data, &declared)
    }
}

/// Open a table file and build its dataset
pub fn read_dataset<P: AsRef<Path>>(path: P) -> Result<Dataset> {
    RawTable::open(path)?.into_dataset()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TABLE: &str = r#"{
        "columns": ["age", "city", "joined", "member"],
        "data": [
            [34, "Oslo", "2024-01-15 09:30:00", true],
            [null, "Lima", "2024-02-01 12:00:00", false],
            [51.0, "Oslo", "not a date", null]
        ],
        "dtypes": {"age": "float64", "city": "object", "joined": "datetime64[ns]", "member": "bool"}
    }"#;

    #[test]
    fn test_dtype_mapping() {
        assert_eq!(dtype_to_semantic("int64"), Some(SemanticType::Integer));
        assert_eq!(dtype_to_semantic("UInt8"), Some(SemanticType::Integer));
        assert_eq!(dtype_to_semantic("float32"), Some(SemanticType::Float));
        assert_eq!(dtype_to_semantic("boolean"), Some(SemanticType::Boolean));
        assert_eq!(
            dtype_to_semantic("datetime64[ns, UTC]"),
            Some(SemanticType::Timestamp)
        );
        assert_eq!(dtype_to_semantic("category"), Some(SemanticType::Text));
        assert_eq!(dtype_to_semantic("object"), None);
    }

    #[test]
    fn test_parse_table_with_dtypes() {
        let table = RawTable::from_slice(TABLE.as_bytes()).unwrap();
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.data[1][0], RawValue::Null);

        let dataset = table.into_dataset().unwrap();
        let age = dataset.get_column("age").unwrap();
        assert_eq!(age.semantic_type(), SemanticType::Float);
        assert_eq!(age.null_count(), 1);

        // "object" falls back to inference
        assert_eq!(
            dataset.get_column("city").unwrap().semantic_type(),
            SemanticType::Text
        );

        let joined = dataset.get_column("joined").unwrap();
        assert_eq!(joined.semantic_type(), SemanticType::Timestamp);
        assert_eq!(joined.null_count(), 1);

        let member = dataset.get_column("member").unwrap();
        assert_eq!(member.semantic_type(), SemanticType::Boolean);
        assert_eq!(member.null_count(), 1);
    }

    #[test]
    fn test_dtypes_optional() {
        let table = RawTable::from_slice(br#"{"columns": ["n"], "data": [[1], [2]]}"#).unwrap();
        assert!(table.dtypes.is_empty());
        let dataset = table.into_dataset().unwrap();
        assert_eq!(
            dataset.get_column("n").unwrap().semantic_type(),
            SemanticType::Integer
        );
    }

    #[test]
    fn test_zstd_input() {
        let compressed = zstd::encode_all(TABLE.as_bytes(), 3).unwrap();
        assert!(compressed.starts_with(&ZSTD_MAGIC));
        let table = RawTable::from_slice(&compressed).unwrap();
        assert_eq!(table, RawTable::from_slice(TABLE.as_bytes()).unwrap());
    }

    #[test]
    fn test_gzip_input() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(TABLE.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        assert!(compressed.starts_with(&GZIP_MAGIC));

        let mut file = tempfile::Builder::new().suffix(".json.gz").tempfile().unwrap();
        file.write_all(&compressed).unwrap();
        file.flush().unwrap();
        let table = RawTable::open(file.path()).unwrap();
        assert_eq!(table, RawTable::from_slice(TABLE.as_bytes()).unwrap());
    }

    #[test]
    fn test_compact_dates_in_object_column() {
        let table = RawTable::from_slice(
            br#"{
                "columns": ["DATA", "code", "note"],
                "data": [
                    ["20250115103045", "20250115103045", "20250115103045"],
                    [null, "00000000000001", "n/a"],
                    ["20241231235959", "12345", null]
                ],
                "dtypes": {"DATA": "object", "code": "object", "note": "object"}
            }"#,
        )
        .unwrap();
        let declared = table.declared_types();
        assert_eq!(declared.get("DATA"), Some(&SemanticType::Timestamp));
        assert_eq!(declared.get("code"), None);
        assert_eq!(declared.get("note"), None);

        let dataset = table.into_dataset().unwrap();
        let data = dataset.get_column("DATA").unwrap();
        assert_eq!(data.semantic_type(), SemanticType::Timestamp);
        assert_eq!(data.null_count(), 1);
        assert_eq!(data.value(0), RawValue::from("2025-01-15T10:30:45.000Z"));
        assert_eq!(
            dataset.get_column("code").unwrap().semantic_type(),
            SemanticType::Integer
        );
    }

    #[test]
    fn test_open_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(TABLE.as_bytes()).unwrap();
        file.flush().unwrap();

        let dataset = read_dataset(file.path()).unwrap();
        assert_eq!(dataset.row_count(), 3);
        assert_eq!(dataset.column_count(), 4);
    }

    #[test]
    fn test_empty_and_ragged_input() {
        let file = NamedTempFile::new().unwrap();
        assert!(matches!(
            RawTable::open(file.path()),
            Err(InsightError::SchemaError(_))
        ));

        let ragged = RawTable::from_slice(br#"{"columns": ["a", "b"], "data": [[1, 2], [3]]}"#)
            .unwrap()
            .into_dataset();
        assert!(matches!(ragged, Err(InsightError::SchemaError(_))));

        assert!(matches!(
            RawTable::from_slice(b"[1, 2"),
            Err(InsightError::Json(_))
        ));
    }
}
