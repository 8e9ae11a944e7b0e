use crate::domain::model::{Order, OrderLine};
use crate::utils::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_REFERENCE_COLUMN: &str = "Artikelnummer";

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const DELIMITER_SAMPLE_BYTES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceOptions {
    pub column: String,
    pub case_insensitive: bool,
    pub strip_leading_zeros: bool,
}

impl Default for ReferenceOptions {
    fn default() -> Self {
        Self {
            column: DEFAULT_REFERENCE_COLUMN.to_string(),
            case_insensitive: false,
            strip_leading_zeros: false,
        }
    }
}

impl ReferenceOptions {
    pub fn normalization(&self) -> Normalization {
        Normalization {
            case_insensitive: self.case_insensitive,
            strip_leading_zeros: self.strip_leading_zeros,
        }
    }
}

/// 參考清單與訂單品項共用的正規化規則
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Normalization {
    pub case_insensitive: bool,
    pub strip_leading_zeros: bool,
}

impl Normalization {
    /// 空白的識別碼回傳 None
    pub fn apply(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let mut id = if self.strip_leading_zeros {
            match trimmed.trim_start_matches('0') {
                "" => "0".to_string(),
                rest => rest.to_string(),
            }
        } else {
            trimmed.to_string()
        };

        if self.case_insensitive {
            id = id.to_lowercase();
        }
        Some(id)
    }
}

/// 單次執行內使用的參考識別碼集合，建立後不再修改
#[derive(Debug, Clone)]
pub struct ReferenceSet {
    identifiers: HashSet<String>,
    normalization: Normalization,
    rows_read: usize,
}

impl ReferenceSet {
    pub fn empty(normalization: Normalization) -> Self {
        Self {
            identifiers: HashSet::new(),
            normalization,
            rows_read: 0,
        }
    }

    pub fn from_identifiers<I, S>(identifiers: I, normalization: Normalization) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rows_read = 0;
        let identifiers = identifiers
            .into_iter()
            .inspect(|_| rows_read += 1)
            .filter_map(|id| normalization.apply(id.as_ref()))
            .collect();

        Self {
            identifiers,
            normalization,
            rows_read,
        }
    }

    /// 解析參考檔 (UTF-8 CSV，逗號或分號分隔)
    pub fn parse(bytes: &[u8], options: &ReferenceOptions) -> Result<Self> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let delimiter = detect_delimiter(bytes);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(bytes);

        let headers = reader.headers()?.clone();
        let column_index = headers
            .iter()
            .position(|h| h.trim() == options.column)
            .or_else(|| {
                headers
                    .iter()
                    .position(|h| h.trim().eq_ignore_ascii_case(&options.column))
            })
            .ok_or_else(|| MonitorError::MissingColumnError {
                column: options.column.clone(),
                found: headers.iter().map(|h| h.trim().to_string()).collect(),
            })?;

        let normalization = options.normalization();
        let mut identifiers = HashSet::new();
        let mut rows_read = 0;

        for record in reader.records() {
            let record = record?;
            rows_read += 1;
            if let Some(id) = record.get(column_index).and_then(|raw| normalization.apply(raw)) {
                identifiers.insert(id);
            }
        }

        tracing::debug!(
            "Parsed {} rows into {} reference identifiers (delimiter '{}')",
            rows_read,
            identifiers.len(),
            delimiter as char
        );

        if identifiers.is_empty() {
            return Err(MonitorError::EmptyReferenceSetError {
                column: options.column.clone(),
            });
        }

        Ok(Self {
            identifiers,
            normalization,
            rows_read,
        })
    }

    pub fn contains(&self, raw_id: &str) -> bool {
        self.normalization
            .apply(raw_id)
            .is_some_and(|id| self.identifiers.contains(&id))
    }

    /// 訂單中識別碼存在於參考集合的品項
    pub fn matching_lines<'a>(&self, order: &'a Order) -> Vec<&'a OrderLine> {
        order
            .lines
            .iter()
            .filter(|line| self.contains(&line.item_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }
}

/// 取樣前 1024 bytes，分號較多時使用分號，否則逗號
pub fn detect_delimiter(bytes: &[u8]) -> u8 {
    let sample = &bytes[..bytes.len().min(DELIMITER_SAMPLE_BYTES)];
    let commas = sample.iter().filter(|&&b| b == b',').count();
    let semicolons = sample.iter().filter(|&&b| b == b';').count();

    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_with_items(ids: &[&str]) -> Order {
        Order {
            id: "order-1".to_string(),
            created_at: None,
            document_number: None,
            customer_name: None,
            total: None,
            lines: ids
                .iter()
                .map(|id| OrderLine {
                    item_id: id.to_string(),
                    name: None,
                    units: None,
                    price: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_parse_semicolon_file() {
        let csv = "Artikelnummer;Bezeichnung\n00123;Cairon C 2.0\n 4711 ;Xyron S 4.9\n00123;Duplicate\n";
        let set = ReferenceSet::parse(csv.as_bytes(), &ReferenceOptions::default()).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.rows_read(), 3);
        assert!(set.contains("00123"));
        assert!(set.contains("4711"));
        assert!(set.contains(" 4711"));
    }

    #[test]
    fn test_parse_comma_file_with_bom() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"Name,Artikelnummer\nCairon,A-1\nXyron,B-2\n");
        let set = ReferenceSet::parse(&bytes, &ReferenceOptions::default()).unwrap();

        assert_eq!(set.len(), 2);
        assert!(set.contains("A-1"));
    }

    #[test]
    fn test_missing_column() {
        let csv = "Referencia;Nombre\n123;Bike\n";
        let err = ReferenceSet::parse(csv.as_bytes(), &ReferenceOptions::default()).unwrap_err();

        match err {
            MonitorError::MissingColumnError { column, found } => {
                assert_eq!(column, "Artikelnummer");
                assert_eq!(found, vec!["Referencia", "Nombre"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_header_lookup_falls_back_to_case_insensitive() {
        let csv = "ARTIKELNUMMER\nX1\n";
        let set = ReferenceSet::parse(csv.as_bytes(), &ReferenceOptions::default()).unwrap();
        assert!(set.contains("X1"));
    }

    #[test]
    fn test_empty_reference_set() {
        let csv = "Artikelnummer;Bezeichnung\n;no id\n   ;blank\n";
        let err = ReferenceSet::parse(csv.as_bytes(), &ReferenceOptions::default()).unwrap_err();
        assert!(matches!(err, MonitorError::EmptyReferenceSetError { .. }));

        let header_only = "Artikelnummer\n";
        let err = ReferenceSet::parse(header_only.as_bytes(), &ReferenceOptions::default())
            .unwrap_err();
        assert!(matches!(err, MonitorError::EmptyReferenceSetError { .. }));
    }

    #[test]
    fn test_leading_zeros_preserved_by_default() {
        let set = ReferenceSet::from_identifiers(["00123"], Normalization::default());

        let order = order_with_items(&["00123", "123"]);
        let matched = set.matching_lines(&order);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].item_id, "00123");
    }

    #[test]
    fn test_strip_leading_zeros() {
        let normalization = Normalization {
            case_insensitive: false,
            strip_leading_zeros: true,
        };
        let set = ReferenceSet::from_identifiers(["00123", "000"], normalization);

        let order = order_with_items(&["00123", "123", "0"]);
        assert_eq!(set.matching_lines(&order).len(), 3);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_case_sensitivity() {
        let sensitive = ReferenceSet::from_identifiers(["AB-1"], Normalization::default());
        assert!(sensitive.contains("AB-1"));
        assert!(!sensitive.contains("ab-1"));

        let insensitive = ReferenceSet::from_identifiers(
            ["AB-1"],
            Normalization {
                case_insensitive: true,
                strip_leading_zeros: false,
            },
        );
        assert!(insensitive.contains("ab-1"));
    }

    #[test]
    fn test_empty_item_ids_never_match() {
        let set = ReferenceSet::from_identifiers(["A"], Normalization::default());
        let order = order_with_items(&["", "  "]);
        assert!(set.matching_lines(&order).is_empty());
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter(b"a;b;c\n1;2;3"), b';');
        assert_eq!(detect_delimiter(b"a,b,c\n1,2,3"), b',');
        assert_eq!(detect_delimiter(b"a;b,c"), b',');
        assert_eq!(detect_delimiter(b""), b',');
    }
}
