//! Logical pagination of extracted text rows.
//!
//! Extraction emits one JSONL record per source text unit (`{"t": ..., "pg": ...}`).
//! Rows are folded into logical pages of roughly equal weight, measured in
//! non-whitespace characters, so that leaf sizing does not depend on how the
//! source document happened to be laid out.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Per-source-page extraction confidence, keyed by source page number.
pub type ConfidenceMap = HashMap<u32, f64>;

/// One source text unit produced by extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextRow {
    /// Text content
    #[serde(default)]
    pub t: String,

    /// Source page number, when known
    #[serde(default)]
    pub pg: Option<u32>,
}

/// A logical page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Zero-based page index
    pub index: usize,

    /// Page text (rows joined with newlines)
    pub text: String,

    /// Mean extraction confidence of the source pages folded into this page
    pub confidence: f64,
}

/// Result of paginating a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    pub pages: Vec<Page>,
}

impl Pagination {
    /// Number of logical pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether the document produced no pages.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Page texts in order.
    pub fn texts(&self) -> Vec<&str> {
        self.pages.iter().map(|p| p.text.as_str()).collect()
    }

    /// Page confidences in order.
    pub fn confidences(&self) -> Vec<f64> {
        self.pages.iter().map(|p| p.confidence).collect()
    }
}

/// Count the characters of `line` that are not whitespace. Blank lines count 0.
pub fn non_blank_count(line: &str) -> usize {
    line.chars().filter(|c| !c.is_whitespace()).count()
}

/// Parse extraction JSONL into rows.
///
/// Unparsable records become empty-text rows rather than failing the document.
/// Empty lines (e.g. a trailing newline) are ignored.
pub fn parse_rows(jsonl: &str) -> Vec<TextRow> {
    jsonl
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(lineno, line)| match serde_json::from_str::<TextRow>(line) {
            Ok(row) => row,
            Err(e) => {
                tracing::debug!("Treating malformed row {} as empty: {}", lineno + 1, e);
                TextRow::default()
            }
        })
        .collect()
}

/// Parse the extraction confidence file (a JSON object of page number to score).
///
/// Keys that are not page numbers are dropped.
pub fn parse_confidence_map(json: &str) -> serde_json::Result<ConfidenceMap> {
    let raw: HashMap<String, f64> = serde_json::from_str(json)?;
    Ok(raw
        .into_iter()
        .filter_map(|(k, v)| k.trim().parse::<u32>().ok().map(|pg| (pg, v.clamp(0.0, 1.0))))
        .collect())
}

/// Fold rows into logical pages of at least `page_chars` non-whitespace characters.
///
/// A page is flushed as soon as its running count reaches `page_chars`; the
/// final partial page is always flushed. Each page's confidence is the mean
/// over the distinct source pages it contains (1.0 for pages missing from
/// `confidences`, and 1.0 when no source page is known at all).
pub fn paginate(rows: &[TextRow], page_chars: usize, confidences: &ConfidenceMap) -> Pagination {
    let mut pages = Vec::new();
    let mut buf = String::new();
    let mut count = 0usize;
    let mut source_pages = BTreeSet::new();
    let mut has_rows = false;

    let flush = |buf: &mut String, source_pages: &mut BTreeSet<u32>, pages: &mut Vec<Page>| {
        let confidence = if source_pages.is_empty() {
            1.0
        } else {
            let sum: f64 = source_pages
                .iter()
                .map(|pg| confidences.get(pg).copied().unwrap_or(1.0))
                .sum();
            sum / source_pages.len() as f64
        };
        pages.push(Page {
            index: pages.len(),
            text: std::mem::take(buf),
            confidence,
        });
        source_pages.clear();
    };

    for row in rows {
        buf.push_str(&row.t);
        buf.push('\n');
        has_rows = true;
        count += non_blank_count(&row.t);
        if let Some(pg) = row.pg {
            source_pages.insert(pg);
        }
        if count >= page_chars {
            flush(&mut buf, &mut source_pages, &mut pages);
            count = 0;
            has_rows = false;
        }
    }
    if has_rows {
        flush(&mut buf, &mut source_pages, &mut pages);
    }

    Pagination { pages }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(t: &str, pg: Option<u32>) -> TextRow {
        TextRow { t: t.to_string(), pg }
    }

    #[test]
    fn test_non_blank_count() {
        assert_eq!(non_blank_count("a b\tc"), 3);
        assert_eq!(non_blank_count("   \t "), 0);
        assert_eq!(non_blank_count(""), 0);
    }

    #[test]
    fn test_parse_rows_absorbs_malformed() {
        let jsonl = "{\"t\":\"hello\",\"pg\":1}\nnot json\n{\"t\":\"world\",\"pg\":null}\n\n";
        let rows = parse_rows(jsonl);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], row("hello", Some(1)));
        assert_eq!(rows[1], TextRow::default());
        assert_eq!(rows[2], row("world", None));
    }

    #[test]
    fn test_parse_confidence_map() {
        let map = parse_confidence_map(r#"{"1": 0.9, "2": 0.5, "x": 0.1}"#).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&1], 0.9);
        assert_eq!(map[&2], 0.5);
        assert!(parse_confidence_map("[1,2]").is_err());
    }

    #[test]
    fn test_paginate_flushes_at_budget() {
        let rows = vec![row("abcd", None), row("ef gh", None), row("ij", None)];
        let pagination = paginate(&rows, 4, &ConfidenceMap::new());

        assert_eq!(pagination.len(), 3);
        assert_eq!(pagination.pages[0].text, "abcd\n");
        assert_eq!(pagination.pages[1].text, "ef gh\n");
        assert_eq!(pagination.pages[2].text, "ij\n");
        assert_eq!(pagination.pages[2].index, 2);
    }

    #[test]
    fn test_blank_rows_do_not_count() {
        let rows = vec![row("ab", None), row("   ", None), row("", None), row("cd", None)];
        let pagination = paginate(&rows, 4, &ConfidenceMap::new());

        assert_eq!(pagination.len(), 1);
        assert_eq!(pagination.pages[0].text, "ab\n   \n\ncd\n");
    }

    #[test]
    fn test_confidence_is_mean_of_source_pages() {
        let confidences: ConfidenceMap = [(1, 0.6), (2, 0.8)].into_iter().collect();
        let rows = vec![
            row("aa", Some(1)),
            row("bb", Some(1)),
            row("cc", Some(2)),
            row("dddddd", Some(3)),
            row("e", None),
        ];
        let pagination = paginate(&rows, 6, &confidences);

        assert_eq!(pagination.len(), 3);
        assert!((pagination.pages[0].confidence - 0.7).abs() < 1e-9);
        // Page 3 is missing from the map and defaults to 1.0
        assert_eq!(pagination.pages[1].confidence, 1.0);
        // No source page known
        assert_eq!(pagination.pages[2].confidence, 1.0);
    }

    #[test]
    fn test_empty_input_yields_no_pages() {
        assert!(paginate(&[], 10, &ConfidenceMap::new()).is_empty());
    }
}
