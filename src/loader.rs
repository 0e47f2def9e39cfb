//! Document loader: raw text out of a knowledge-base file.
//!
//! The file extension picks the extractor (see [`SourceFormat`]). Every
//! failure is returned as a [`LoadError`] for that one file so the rebuild
//! can record it and move on to the next file.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

use crate::models::{SourceDocument, SourceFormat};

/// Maximum decompressed bytes read from `word/document.xml` (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("no extractable text")]
    NoText,
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

impl LoadError {
    /// True for skips that are part of normal operation (a stray image in
    /// the directory, a scanned PDF) as opposed to broken or unreadable files.
    pub fn is_expected(&self) -> bool {
        matches!(self, LoadError::Unsupported(_) | LoadError::NoText)
    }
}

/// Extract the text of one document.
///
/// Returns [`LoadError::NoText`] when extraction succeeds but yields only
/// whitespace.
pub fn load_document(doc: &SourceDocument) -> Result<String, LoadError> {
    let text = match doc.format {
        SourceFormat::Unsupported => {
            let ext = doc
                .path
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_else(|| "<none>".to_string());
            return Err(LoadError::Unsupported(ext));
        }
        SourceFormat::PlainText => String::from_utf8(std::fs::read(&doc.path)?)?,
        SourceFormat::Paginated => extract_pdf(&std::fs::read(&doc.path)?)?,
        SourceFormat::WordProcessor => extract_docx(&std::fs::read(&doc.path)?)?,
    };

    if text.trim().is_empty() {
        return Err(LoadError::NoText);
    }
    Ok(text)
}

/// Infallible form of [`load_document`]: any failure becomes empty text.
pub fn load_text(path: &Path) -> String {
    load_document(&SourceDocument::new(path)).unwrap_or_default()
}

fn extract_pdf(bytes: &[u8]) -> Result<String, LoadError> {
    // pdf-extract panics on some malformed inputs instead of returning Err.
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| LoadError::Pdf("parser panicked on malformed input".to_string()))?
        .map_err(|e| LoadError::Pdf(e.to_string()))?;
    Ok(join_pages(pages))
}

/// Join trimmed page texts with a newline, dropping pages with no text
/// (scanned images and blank pages contribute nothing).
pub fn join_pages<I, S>(pages: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for page in pages {
        let page = page.as_ref().trim();
        if page.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(page);
    }
    out
}

fn extract_docx(bytes: &[u8]) -> Result<String, LoadError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| LoadError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| LoadError::Docx(e.to_string()))?;

    let mut xml = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut xml)?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(LoadError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    docx_paragraphs(&xml)
}

/// Collect `<w:t>` run text, one line per `<w:p>` paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<String, LoadError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text_run = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text_run => {
                let text = te.unescape().map_err(|e| LoadError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(LoadError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", p))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_plain_text_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("resume.txt");
        std::fs::write(&path, "Senior Rust engineer\nTokio, Axum").unwrap();
        let text = load_document(&SourceDocument::new(&path)).unwrap();
        assert_eq!(text, "Senior Rust engineer\nTokio, Axum");
    }

    #[test]
    fn test_unsupported_extension() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("photo.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();
        let err = load_document(&SourceDocument::new(&path)).unwrap_err();
        assert!(matches!(err, LoadError::Unsupported(ref ext) if ext == "png"));
        assert!(err.is_expected());
        assert_eq!(load_text(&path), "");
    }

    #[test]
    fn test_whitespace_only_is_no_text() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blank.txt");
        std::fs::write(&path, "  \n\t \n").unwrap();
        let err = load_document(&SourceDocument::new(&path)).unwrap_err();
        assert!(matches!(err, LoadError::NoText));
    }

    #[test]
    fn test_invalid_utf8_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.txt");
        std::fs::write(&path, [0xff, 0xfe, 0xfd, b'a']).unwrap();
        let err = load_document(&SourceDocument::new(&path)).unwrap_err();
        assert!(matches!(err, LoadError::Encoding(_)));
        assert!(!err.is_expected());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_document(&SourceDocument::new(tmp.path().join("gone.txt"))).unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }

    #[test]
    fn test_invalid_pdf_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("corrupt.pdf");
        std::fs::write(&path, b"this is not a pdf at all").unwrap();
        let err = load_document(&SourceDocument::new(&path)).unwrap_err();
        assert!(matches!(err, LoadError::Pdf(_)));
        assert_eq!(load_text(&path), "");
    }

    #[test]
    fn test_join_pages_skips_empty_pages() {
        let joined = join_pages(vec!["\n\nPage one\n", "", "   \n", "Page three"]);
        assert_eq!(joined, "Page one\nPage three");
        assert_eq!(join_pages(Vec::<String>::new()), "");
    }

    #[test]
    fn test_docx_paragraphs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("resume.docx");
        std::fs::write(&path, docx_bytes(&["Jane Doe", "Rust &amp; Go developer"])).unwrap();
        let text = load_document(&SourceDocument::new(&path)).unwrap();
        assert_eq!(text, "Jane Doe\nRust & Go developer\n");
    }

    #[test]
    fn test_docx_not_a_zip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("resume.docx");
        std::fs::write(&path, b"not a zip").unwrap();
        let err = load_document(&SourceDocument::new(&path)).unwrap_err();
        assert!(matches!(err, LoadError::Docx(_)));
    }
}
