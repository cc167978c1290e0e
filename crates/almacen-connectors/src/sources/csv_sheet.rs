//! Published spreadsheet ("publish to web as CSV") turned into a single price-list document.

use super::{http_client, DEFAULT_FETCH_TIMEOUT};
use almacen_core::{csv_to_markdown_table, now_ms, DocumentSource, KnowledgeDocument, SourceError};
use std::time::Duration;

pub const SHEET_DOCUMENT_ID: &str = "sys-csv-dynamic";
pub const SHEET_DOCUMENT_TITLE: &str = "Lista de Precios y Productos (Dinámica)";

const SHEET_PREAMBLE: &str = "--- BASE DE DATOS DE PRODUCTOS (ACTUALIZADA) ---\nFormato: Tabla Markdown\n\n";

pub struct CsvSheetSource {
    url: String,
    client: reqwest::Client,
}

impl CsvSheetSource {
    pub fn new(url: impl Into<String>) -> Result<Self, SourceError> {
        Self::with_timeout(url, DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        Ok(Self {
            url: url.into(),
            client: http_client(timeout)?,
        })
    }
}

/// Wraps converted sheet text in the dynamic price-list document. `None` for an empty sheet.
pub(crate) fn sheet_document(csv: &str) -> Option<KnowledgeDocument> {
    let table = csv_to_markdown_table(csv);
    if table.is_empty() {
        return None;
    }
    Some(KnowledgeDocument::new(
        SHEET_DOCUMENT_ID,
        SHEET_DOCUMENT_TITLE,
        format!("{}{}", SHEET_PREAMBLE, table),
        now_ms(),
        true,
    ))
}

#[async_trait::async_trait]
impl DocumentSource for CsvSheetSource {
    fn name(&self) -> &str {
        "csv-sheet"
    }

    async fn load(&self) -> Result<Vec<KnowledgeDocument>, SourceError> {
        if !self.url.contains("http") {
            return Err(SourceError::InvalidUrl(self.url.clone()));
        }
        tracing::info!(target: "almacen::sources", url = %self.url, "Fetching CSV sheet");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SourceError::Fetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status().as_u16()));
        }
        let text = response
            .text()
            .await
            .map_err(|e| SourceError::Fetch(e.to_string()))?;
        Ok(sheet_document(&text).into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::serve_fixture;
    use axum::{routing::get, Router};

    #[test]
    fn sheet_becomes_one_system_document() {
        let doc = sheet_document("Producto,Precio\nYerba,$3800\n").unwrap();
        assert_eq!(doc.id, SHEET_DOCUMENT_ID);
        assert_eq!(doc.title, SHEET_DOCUMENT_TITLE);
        assert!(doc.is_system_owned);
        assert!(doc.content.starts_with(SHEET_PREAMBLE));
        assert!(doc.content.ends_with("| Yerba | $3800 |"));
    }

    #[test]
    fn empty_sheet_yields_nothing() {
        assert!(sheet_document("\n  \n").is_none());
    }

    #[tokio::test]
    async fn url_without_scheme_is_rejected() {
        let err = CsvSheetSource::new("docs.google.com/sheet.csv")
            .unwrap()
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn fetches_published_csv() {
        let app = Router::new().route(
            "/pub.csv",
            get(|| async { "Producto,Precio\n\"Queso, cremoso\",$8500" }),
        );
        let base = serve_fixture(app).await;
        let docs = CsvSheetSource::new(format!("{}/pub.csv", base))
            .unwrap()
            .load()
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].content.contains("| Queso, cremoso | $8500 |"));
    }
}
