use crate::error::IngestError;
use lopdf::Document;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::warn;

const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Docx,
    Text,
}

impl FileKind {
    /// Kind of an uploadable file, by case-insensitive extension.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|extension| extension.to_str())?
            .to_ascii_lowercase();

        match extension.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Text),
            _ => None,
        }
    }
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl TextExtractor for LopdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut text = String::new();
        for page_no in document.get_pages().keys() {
            let page_text = match document.extract_text(&[*page_no]) {
                Ok(page_text) => page_text,
                Err(error) => {
                    warn!(page = *page_no, error = %error, "skipping unreadable pdf page");
                    continue;
                }
            };

            if !page_text.trim().is_empty() {
                text.push_str(page_text.trim_end());
                text.push('\n');
            }
        }

        if text.is_empty() {
            return Err(IngestError::PdfParse(
                "pdf had no readable page text".to_string(),
            ));
        }

        Ok(text)
    }
}

/// Text of the `w:t` runs in `word/document.xml`, one line per paragraph.
#[derive(Default)]
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, IngestError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|error| IngestError::DocxParse(error.to_string()))?;
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|error| IngestError::DocxParse(error.to_string()))?;

        let mut xml = Vec::new();
        entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut xml)?;
        if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(IngestError::DocxParse(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }

        paragraphs_from_document_xml(&xml)
    }
}

fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, IngestError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) if element.local_name().as_ref() == b"t" => {
                in_text_run = true;
            }
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(element)) if element.local_name().as_ref() == b"tab" => {
                out.push('\t');
            }
            Ok(Event::Text(text)) if in_text_run => {
                let unescaped = text
                    .unescape()
                    .map_err(|error| IngestError::DocxParse(error.to_string()))?;
                out.push_str(&unescaped);
            }
            Ok(Event::Eof) => break,
            Err(error) => return Err(IngestError::DocxParse(error.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

/// Undecodable bytes are replaced rather than failing the whole file.
#[derive(Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, IngestError> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Extracts plain text from an uploaded file, dispatching on its extension.
pub fn extract_text(file_name: &str, bytes: &[u8]) -> Result<String, IngestError> {
    match FileKind::from_file_name(file_name) {
        Some(FileKind::Pdf) => LopdfExtractor.extract(bytes),
        Some(FileKind::Docx) => DocxExtractor.extract(bytes),
        Some(FileKind::Text) => PlainTextExtractor.extract(bytes),
        None => Err(IngestError::UnsupportedFileType(file_name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn docx_with(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn file_kind_is_case_insensitive() {
        assert_eq!(FileKind::from_file_name("Report.PDF"), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_file_name("notes.Docx"), Some(FileKind::Docx));
        assert_eq!(FileKind::from_file_name("a.txt"), Some(FileKind::Text));
        assert_eq!(FileKind::from_file_name("image.png"), None);
        assert_eq!(FileKind::from_file_name("README"), None);
    }

    #[test]
    fn plain_text_is_decoded_lossily() {
        let text = extract_text("a.txt", b"caf\xc3\xa9 \xff ok").unwrap();
        assert!(text.starts_with("café "));
        assert!(text.ends_with(" ok"));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t xml:space="preserve">Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>
    <w:p><w:r><w:t>Tom &amp; Jerry</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

        let text = extract_text("letter.docx", &docx_with(xml)).unwrap();
        assert_eq!(text, "Hello world\nTom & Jerry\n");
    }

    #[test]
    fn docx_without_document_part_is_an_error() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("other.xml", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<x/>").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        assert!(matches!(
            extract_text("broken.docx", &bytes),
            Err(IngestError::DocxParse(_))
        ));
    }

    #[test]
    fn unreadable_pdf_is_a_parse_error() {
        assert!(matches!(
            extract_text("broken.pdf", b"%PDF-1.4\n%broken"),
            Err(IngestError::PdfParse(_))
        ));
    }

    fn pdf_with_pages(page_operations: Vec<Vec<Operation>>) -> Vec<u8> {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        let font_id = document.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = document.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for operations in page_operations {
            let content = Content { operations }.encode().unwrap();
            let content_id = document.add_object(Stream::new(dictionary! {}, content));
            let page_id = document.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        document.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        document.save_to(&mut bytes).unwrap();
        bytes
    }

    fn text_page(text: &str) -> Vec<Operation> {
        vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ]
    }

    fn page_with_bare_font_operator() -> Vec<Operation> {
        vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![]),
            Operation::new("ET", vec![]),
        ]
    }

    #[test]
    fn unreadable_pdf_page_is_skipped() {
        let bytes = pdf_with_pages(vec![
            text_page("page one"),
            page_with_bare_font_operator(),
            text_page("page three"),
        ]);

        let text = extract_text("report.pdf", &bytes).unwrap();
        assert!(text.contains("page one"));
        assert!(text.contains("page three"));
    }

    #[test]
    fn pdf_without_any_readable_page_is_a_parse_error() {
        let bytes = pdf_with_pages(vec![page_with_bare_font_operator()]);

        assert!(matches!(
            extract_text("empty.pdf", &bytes),
            Err(IngestError::PdfParse(_))
        ));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(matches!(
            extract_text("slides.pptx", b""),
            Err(IngestError::UnsupportedFileType(_))
        ));
    }
}
