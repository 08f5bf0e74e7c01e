//! Rulebook loading. Never fails: problems degrade to empty or placeholder
//! pages and are logged.

use std::{
    panic::{self, AssertUnwindSafe},
    path::Path,
};

use {
    pdf_extract::{Document, OutputError, PlainTextOutput},
    tracing::{debug, info, warn},
};

/// Text used when no rulebook is available, so the index is never empty.
pub const PLACEHOLDER_TEXT: &str =
    "Goliath: A race of powerful humanoids known for their strength and size.";

/// Text of one rulebook page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub text: String,
    /// 1-based page number; `None` for synthetic content.
    pub page: Option<u32>,
}

/// The single synthetic page used when the rulebook is missing or unreadable.
pub fn placeholder_pages() -> Vec<PageText> {
    vec![PageText {
        text: PLACEHOLDER_TEXT.to_string(),
        page: None,
    }]
}

/// Load the rulebook at `path` as one block per page.
///
/// A missing file yields [`placeholder_pages`]. An unreadable or corrupt file
/// yields an empty vector. A page the extractor cannot handle keeps its slot
/// with empty text. Extraction runs on the blocking pool because PDF parsing
/// is CPU-bound.
pub async fn load_rulebook(path: &Path) -> Vec<PageText> {
    if !path.exists() {
        info!(path = %path.display(), "rulebook not found, using placeholder content");
        return placeholder_pages();
    }

    let owned = path.to_path_buf();
    match tokio::task::spawn_blocking(move || extract_pages(&owned)).await {
        Ok(pages) => {
            info!(path = %path.display(), pages = pages.len(), "rulebook loaded");
            pages
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "rulebook extraction aborted");
            Vec::new()
        },
    }
}

fn extract_pages(path: &Path) -> Vec<PageText> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read rulebook");
            return Vec::new();
        },
    };
    let doc = match open_document(&bytes) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse rulebook pdf");
            return Vec::new();
        },
    };

    let pages: Vec<PageText> = doc
        .get_pages()
        .into_keys()
        .map(|page| PageText {
            text: extract_page(&doc, page).map(|t| clean_page_text(&t)).unwrap_or_default(),
            page: Some(page),
        })
        .collect();
    let empty = pages.iter().filter(|p| p.text.trim().is_empty()).count();
    if empty > 0 {
        debug!(path = %path.display(), empty, total = pages.len(), "pages without text");
    }
    pages
}

/// Parse the PDF structure, decrypting documents that use an empty user
/// password.
fn open_document(bytes: &[u8]) -> Result<Document, pdf_extract::Error> {
    let mut doc = Document::load_mem(bytes)?;
    if doc.is_encrypted() {
        doc.decrypt("")?;
    }
    Ok(doc)
}

/// Text of one page, or `None` when the extractor fails or panics on it.
fn extract_page(doc: &Document, page: u32) -> Option<String> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut text = String::new();
        {
            let mut output = PlainTextOutput::new(&mut text);
            pdf_extract::output_doc_page(doc, &mut output, page)?;
        }
        Ok::<_, OutputError>(text)
    }));
    match result {
        Ok(Ok(text)) => Some(text),
        Ok(Err(e)) => {
            warn!(page, error = %e, "failed to extract page text");
            None
        },
        Err(_) => {
            warn!(page, "page extraction panicked");
            None
        },
    }
}

/// Drop control characters the extractor leaves behind (form feeds, NULs),
/// keeping newlines and tabs.
fn clean_page_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}
