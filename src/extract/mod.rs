//! Document extraction collaborator.
//!
//! Extraction turns a source document into JSONL text rows, a per-page
//! confidence map and (optionally) a searchable PDF, all written into the
//! output container. OCR itself lives outside this crate; [`StoreExtractor`]
//! ingests documents whose text has already been extracted.

use crate::chunking::TextRow;
use crate::error::{Error, Result};
use crate::io::{ArtifactStore, DocLayout};
use async_trait::async_trait;
use object_store::path::Path;
use serde::{Deserialize, Serialize};

/// A source document to summarize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub doc_id: String,
    pub input_container: String,
    pub input_path: String,
}

/// Locations of extraction outputs in the output container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    pub jsonl_path: String,
    pub confidence_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searchable_pdf: Option<String>,
}

/// Produces extraction outputs for a document.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, document: &DocumentRef) -> Result<Extraction>;
}

/// Extractor for documents whose text is already available in the input
/// container.
///
/// A `.jsonl` input is copied unchanged. Any other input is read as plain
/// text, one row per line, with form feeds starting a new source page.
/// Sidecars next to the input are picked up when present:
/// `<input>.confidence.json` and `<input>.searchable.pdf`.
///
/// The extractor is bound to one input container; documents naming another
/// container are rejected.
pub struct StoreExtractor {
    input: ArtifactStore,
    container: String,
    work: ArtifactStore,
}

impl StoreExtractor {
    pub fn new(input: ArtifactStore, container: impl Into<String>, work: ArtifactStore) -> Self {
        Self {
            input,
            container: container.into(),
            work,
        }
    }
}

#[async_trait]
impl Extractor for StoreExtractor {
    async fn extract(&self, document: &DocumentRef) -> Result<Extraction> {
        if document.input_container != self.container {
            return Err(Error::InvalidConfig(format!(
                "{}: input container '{}' does not match the extractor's container '{}'",
                document.doc_id, document.input_container, self.container
            )));
        }

        let layout = DocLayout::new(document.doc_id.as_str());
        let source = Path::from(document.input_path.as_str());
        let raw = self.input.read_text(&source).await?;

        let jsonl = if document.input_path.ends_with(".jsonl") {
            raw
        } else {
            plain_text_to_jsonl(&raw)?
        };
        let jsonl_path = layout.extracted_text();
        self.work.write_text(&jsonl_path, jsonl).await?;

        let confidence_source = Path::from(format!("{}.confidence.json", document.input_path));
        let confidence = self
            .input
            .try_read_text(&confidence_source)
            .await?
            .unwrap_or_else(|| "{}".to_string());
        let confidence_path = layout.confidence();
        self.work.write_text(&confidence_path, confidence).await?;

        let pdf_source = Path::from(format!("{}.searchable.pdf", document.input_path));
        let searchable_pdf = match copy_optional(&self.input, &self.work, &pdf_source, &layout.searchable_pdf()).await {
            Ok(copied) => copied,
            Err(e) => {
                tracing::warn!("{}: searchable PDF not copied: {}", document.doc_id, e);
                None
            }
        };

        tracing::info!("{}: extracted {} into {}", document.doc_id, source, jsonl_path);
        Ok(Extraction {
            jsonl_path: jsonl_path.to_string(),
            confidence_path: confidence_path.to_string(),
            searchable_pdf,
        })
    }
}

async fn copy_optional(
    from: &ArtifactStore,
    to: &ArtifactStore,
    source: &Path,
    dest: &Path,
) -> Result<Option<String>> {
    match from.try_read_bytes(source).await? {
        Some(bytes) => {
            to.write_bytes(dest, bytes).await?;
            Ok(Some(dest.to_string()))
        }
        None => Ok(None),
    }
}

/// Convert plain text into JSONL rows. Source pages are numbered from 1.
fn plain_text_to_jsonl(text: &str) -> Result<String> {
    let mut out = String::new();
    for (page_idx, page) in text.split('\u{c}').enumerate() {
        for line in page.lines() {
            let row = TextRow {
                t: line.to_string(),
                pg: Some(page_idx as u32 + 1),
            };
            out.push_str(&serde_json::to_string(&row)?);
            out.push('\n');
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::parse_rows;
    use object_store::memory::InMemory;
    use std::sync::Arc;

    fn stores() -> (ArtifactStore, ArtifactStore) {
        (
            ArtifactStore::new(Arc::new(InMemory::new())),
            ArtifactStore::new(Arc::new(InMemory::new())),
        )
    }

    fn doc(path: &str) -> DocumentRef {
        DocumentRef {
            doc_id: "doc".to_string(),
            input_container: "incoming".to_string(),
            input_path: path.to_string(),
        }
    }

    #[test]
    fn test_form_feed_advances_page() {
        let jsonl = plain_text_to_jsonl("one\ntwo\u{c}three").unwrap();
        let rows = parse_rows(&jsonl);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].pg, Some(1));
        assert_eq!(rows[2].t, "three");
        assert_eq!(rows[2].pg, Some(2));
    }

    #[tokio::test]
    async fn test_jsonl_input_is_copied() {
        let (input, work) = stores();
        let body = "{\"t\":\"hello\",\"pg\":1}\n";
        input.write_text(&Path::from("a/doc.jsonl"), body).await.unwrap();

        let extraction = StoreExtractor::new(input, "incoming", work.clone())
            .extract(&doc("a/doc.jsonl"))
            .await
            .unwrap();

        assert_eq!(extraction.jsonl_path, "doc/extracted/text.jsonl");
        assert_eq!(work.read_text(&Path::from("doc/extracted/text.jsonl")).await.unwrap(), body);
        assert_eq!(
            work.read_text(&Path::from("doc/extracted/confidence.json")).await.unwrap(),
            "{}"
        );
        assert!(extraction.searchable_pdf.is_none());
    }

    #[tokio::test]
    async fn test_sidecars_are_copied() {
        let (input, work) = stores();
        input.write_text(&Path::from("doc.txt"), "text").await.unwrap();
        input
            .write_text(&Path::from("doc.txt.confidence.json"), r#"{"1": 0.5}"#)
            .await
            .unwrap();
        input
            .write_bytes(&Path::from("doc.txt.searchable.pdf"), b"%PDF-1.7".to_vec())
            .await
            .unwrap();

        let extraction = StoreExtractor::new(input, "incoming", work.clone())
            .extract(&doc("doc.txt"))
            .await
            .unwrap();

        assert_eq!(extraction.searchable_pdf.as_deref(), Some("doc/derived/searchable.pdf"));
        assert_eq!(
            work.read_text(&Path::from("doc/extracted/confidence.json")).await.unwrap(),
            r#"{"1": 0.5}"#
        );
    }

    #[tokio::test]
    async fn test_missing_input_fails() {
        let (input, work) = stores();
        let result = StoreExtractor::new(input, "incoming", work).extract(&doc("missing.txt")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_other_container_is_rejected() {
        let (input, work) = stores();
        input.write_text(&Path::from("doc.txt"), "text").await.unwrap();

        let mut document = doc("doc.txt");
        document.input_container = "archive".to_string();
        let err = StoreExtractor::new(input, "incoming", work.clone())
            .extract(&document)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidConfig(ref msg) if msg.contains("'archive'")));
        assert!(work
            .try_read_text(&Path::from("doc/extracted/text.jsonl"))
            .await
            .unwrap()
            .is_none());
    }
}
