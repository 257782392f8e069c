//! Text extraction for uploaded documents.
//!
//! Uploads arrive as raw bytes plus a display name. The content type is
//! inferred from the name's extension ([`content_type_for`]) and
//! [`extract_text`] returns plain UTF-8 text ready for
//! [`normalize_text`](tutor_rag_core::chunk::normalize_text) and chunking.
//!
//! | Extension | Content type | Method |
//! |-----------|--------------|--------|
//! | `.txt`, none | `text/plain` | UTF-8 decode |
//! | `.md`, `.markdown` | `text/markdown` | UTF-8 decode |
//! | `.pdf` | `application/pdf` | `pdf-extract` |
//! | `.docx` | OOXML wordprocessing | `zip` + `quick-xml`, `w:t` runs |
//! | `.pptx` | OOXML presentation | `zip` + `quick-xml`, `a:t` runs per slide |
//!
//! OOXML paragraphs are separated by a blank line so the chunker can prefer
//! paragraph boundaries. Extraction never panics on malformed input.

use std::io::{Cursor, Read};

use quick_xml::events::Event;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb bound).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum slides read from one presentation.
const MAX_SLIDES: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("text is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

fn ooxml(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Ooxml(e.to_string())
}

/// Infer a content type from a display name. Unknown extensions are
/// rejected rather than guessed.
pub fn content_type_for(display_name: &str) -> Result<&'static str, ExtractError> {
    let ext = match display_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => return Ok(MIME_TEXT),
    };
    match ext.as_str() {
        "txt" | "text" => Ok(MIME_TEXT),
        "md" | "markdown" => Ok(MIME_MARKDOWN),
        "pdf" => Ok(MIME_PDF),
        "docx" => Ok(MIME_DOCX),
        "pptx" => Ok(MIME_PPTX),
        other => Err(ExtractError::UnsupportedContentType(format!(".{}", other))),
    }
}

/// Guess a content type from leading bytes: PDF magic, OOXML archives by
/// their main part, anything else as plain text.
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"%PDF-") {
        return MIME_PDF;
    }
    if bytes.starts_with(b"PK\x03\x04") {
        if let Ok(archive) = open_archive(bytes) {
            if archive.file_names().any(|n| n == "word/document.xml") {
                return MIME_DOCX;
            }
            if archive.file_names().any(|n| n.starts_with("ppt/slides/")) {
                return MIME_PPTX;
            }
        }
    }
    MIME_TEXT
}

/// Extract plain text from `bytes` of the given content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_TEXT | MIME_MARKDOWN => Ok(String::from_utf8(bytes.to_vec())?),
        MIME_PDF => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        other => Err(ExtractError::UnsupportedContentType(other.to_string())),
    }
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(ooxml)
}

fn read_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name).map_err(ooxml)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(ooxml)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry_bounded(&mut archive, "word/document.xml")?;
    collect_paragraphs(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|n| {
            let number = n
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, n.to_string()))
        })
        .collect();
    slides.sort();

    let mut out = String::new();
    for (_, name) in slides.into_iter().take(MAX_SLIDES) {
        let xml = read_entry_bounded(&mut archive, &name)?;
        let text = collect_paragraphs(&xml)?;
        if text.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&text);
    }
    Ok(out)
}

/// Concatenate `t` runs, one paragraph per `p` element.
///
/// WordprocessingML (`w:p`/`w:t`) and DrawingML (`a:p`/`a:t`) share local
/// names, so one reader handles both formats.
fn collect_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut paragraph = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => push_paragraph(&mut out, &mut paragraph),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                paragraph.push_str(&t.unescape().map_err(ooxml)?);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    push_paragraph(&mut out, &mut paragraph);
    Ok(out)
}

fn push_paragraph(out: &mut String, paragraph: &mut String) {
    let text = paragraph.trim();
    if !text.is_empty() {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(text);
    }
    paragraph.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, String)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    fn docx(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", p))
            .collect();
        zip_with(&[(
            "word/document.xml",
            format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            ),
        )])
    }

    fn slide(text: &str) -> String {
        format!(
            "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
            text
        )
    }

    #[test]
    fn test_content_type_from_extension() {
        assert_eq!(content_type_for("notes.TXT").unwrap(), MIME_TEXT);
        assert_eq!(content_type_for("README").unwrap(), MIME_TEXT);
        assert_eq!(content_type_for("lesson.md").unwrap(), MIME_MARKDOWN);
        assert_eq!(content_type_for("paper.pdf").unwrap(), MIME_PDF);
        assert_eq!(content_type_for("essay.docx").unwrap(), MIME_DOCX);
        assert_eq!(content_type_for("deck.pptx").unwrap(), MIME_PPTX);
        assert!(matches!(
            content_type_for("archive.tar.gz"),
            Err(ExtractError::UnsupportedContentType(_))
        ));
    }

    #[test]
    fn test_sniff_content_type() {
        assert_eq!(sniff_content_type(b"%PDF-1.4 ..."), MIME_PDF);
        assert_eq!(sniff_content_type(&docx(&["hi"])), MIME_DOCX);
        let deck = zip_with(&[("ppt/slides/slide1.xml", slide("Hi"))]);
        assert_eq!(sniff_content_type(&deck), MIME_PPTX);
        assert_eq!(sniff_content_type(b"Plain notes"), MIME_TEXT);
    }

    #[test]
    fn test_plain_text_passthrough() {
        let text = extract_text("Cells divide by mitosis.".as_bytes(), MIME_TEXT).unwrap();
        assert_eq!(text, "Cells divide by mitosis.");
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let err = extract_text(&[0xff, 0xfe, 0x00], MIME_TEXT).unwrap_err();
        assert!(matches!(err, ExtractError::Encoding(_)));
    }

    #[test]
    fn test_unsupported_content_type() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn test_invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn test_invalid_zip_returns_error() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn test_docx_paragraphs_separated() {
        let bytes = docx(&["Photosynthesis &amp; light.", "Respiration releases energy."]);
        let text = extract_text(&bytes, MIME_DOCX).unwrap();
        assert_eq!(
            text,
            "Photosynthesis & light.\n\nRespiration releases energy."
        );
    }

    #[test]
    fn test_docx_without_document_xml() {
        let bytes = zip_with(&[("word/other.xml", "<x/>".to_string())]);
        assert!(matches!(
            extract_text(&bytes, MIME_DOCX),
            Err(ExtractError::Ooxml(_))
        ));
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", slide("Tenth")),
            ("ppt/slides/slide2.xml", slide("Second")),
            ("ppt/slides/slide1.xml", slide("First")),
        ]);
        let text = extract_text(&bytes, MIME_PPTX).unwrap();
        assert_eq!(text, "First\n\nSecond\n\nTenth");
    }
}
