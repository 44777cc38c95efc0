use std::io::{Cursor, Read};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("Unsupported file type: .{0}")]
    Unsupported(String),
    #[error("Text file is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("DOCX archive error: {0}")]
    Docx(#[from] zip::result::ZipError),
    #[error("DOCX read error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("Image decode error: {0}")]
    Image(image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PlainText,
    Docx,
    Pdf,
    Image,
}

impl DocumentKind {
    pub fn from_extension(ext: &str) -> Result<Self, ExtractError> {
        match ext {
            "txt" => Ok(Self::PlainText),
            "docx" => Ok(Self::Docx),
            "pdf" => Ok(Self::Pdf),
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "tiff" | "bmp" => Ok(Self::Image),
            other => Err(ExtractError::Unsupported(other.to_string())),
        }
    }
}

/// Lower-cased extension of `filename` without the dot; empty when absent.
pub fn extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

pub fn plain_text(bytes: &[u8]) -> Result<String, ExtractError> {
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Body paragraphs of a `.docx`, one per line.
pub fn docx_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut xml = String::new();
    archive.by_name("word/document.xml")?.read_to_string(&mut xml)?;
    Ok(docx_paragraphs(&xml).join("\n"))
}

/// Every page's text followed by a newline.
pub fn pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let document = lopdf::Document::load_mem(bytes)?;
    let mut text = String::new();
    for page_number in document.get_pages().keys() {
        text.push_str(&document.extract_text(&[*page_number]).unwrap_or_default());
        text.push('\n');
    }
    Ok(text)
}

fn docx_paragraphs(xml: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Option<String> = None;
    let mut rest = xml;

    while let Some(start) = rest.find('<') {
        let after = &rest[start..];
        let Some(end) = after.find('>') else { break };
        let tag = &after[1..end];
        rest = &after[end + 1..];

        let closing = tag.starts_with('/');
        let self_closing = tag.ends_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or_default();

        match (closing, name) {
            (false, "w:p") if self_closing => paragraphs.push(String::new()),
            (false, "w:p") => current = Some(String::new()),
            (true, "w:p") => paragraphs.extend(current.take()),
            (false, "w:t") if !self_closing => {
                let close = rest.find("</w:t>").unwrap_or(rest.len());
                if let Some(paragraph) = current.as_mut() {
                    paragraph.push_str(&unescape_xml(&rest[..close]));
                }
                rest = &rest[close..];
            }
            (false, "w:tab") => current.iter_mut().for_each(|p| p.push('\t')),
            (false, "w:br") | (false, "w:cr") => current.iter_mut().for_each(|p| p.push('\n')),
            _ => {}
        }
    }
    paragraphs
}

/// Resolves the predefined entities and numeric character references in one
/// pass; anything unrecognised is kept verbatim.
fn unescape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail
            .find(';')
            .and_then(|end| decode_entity(&tail[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let digits = name.strip_prefix('#')?;
            let code = match digits.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
