//! Archive text extraction.
//!
//! Opens a packaged e-book archive, resolves its content documents in reading
//! order (spine first, manifest declaration order as fallback), and projects
//! them to concatenated plain text. Parse failures at the container level are
//! fatal; a single unreadable document is skipped with a warning.

pub mod package;

use std::fs;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use log::{debug, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::content::{MarkupSanitizer, Sanitizer};
use crate::error::{Error, Result};
use package::{parse_container, parse_package, strip_bom};

/// Result of extracting an archive's readable text.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Plain text of all readable documents, joined by blank lines.
    pub text: String,
    pub title: Option<String>,
    pub author: Option<String>,
    /// Documents that contributed text.
    pub document_count: usize,
}

/// Extract the plain text of a packaged e-book archive.
pub fn extract_text(bytes: &[u8]) -> Result<Extraction> {
    let mut archive = match ZipArchive::new(Cursor::new(bytes)) {
        Ok(archive) => archive,
        Err(ZipError::InvalidArchive(_)) | Err(ZipError::UnsupportedArchive(_)) => {
            return Err(Error::UnsupportedFormat(
                "input is not a zip-packaged archive".into(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let container = read_archive_file(&mut archive, "META-INF/container.xml")
        .map_err(|_| Error::ContainerMalformed("missing META-INF/container.xml".into()))?;
    let opf_path = parse_container(container.as_bytes())?;
    let opf_dir = Path::new(&opf_path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    let opf_content = read_archive_file(&mut archive, &opf_path).map_err(|_| {
        Error::ContainerMalformed(format!("package document {} not readable", opf_path))
    })?;
    let package = parse_package(&opf_content)?;

    let hrefs = package.reading_order();
    debug!("extracting {} content documents", hrefs.len());

    // Scratch area for staged documents, removed on every exit path.
    let scratch = tempfile::tempdir()?;
    let sanitizer = MarkupSanitizer;
    let mut parts: Vec<String> = Vec::new();

    for (i, href) in hrefs.iter().enumerate() {
        let full_path = resolve_path(&opf_dir, href);
        let markup = match stage_document(&mut archive, &full_path, scratch.path(), i) {
            Ok(markup) => markup,
            Err(e) => {
                warn!("skipping unreadable document {}: {}", href, e);
                continue;
            }
        };
        let text = sanitizer.plain_text(&markup);
        if !text.is_empty() {
            parts.push(text);
        }
    }

    if parts.is_empty() {
        return Err(Error::NoContentExtracted);
    }

    Ok(Extraction {
        document_count: parts.len(),
        text: parts.join("\n\n"),
        title: package.title,
        author: package.author,
    })
}

/// Copy one archive entry into the scratch area and read it back decoded.
fn stage_document<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    path: &str,
    scratch: &Path,
    index: usize,
) -> Result<String> {
    let raw = read_archive_file_bytes(archive, path)?;

    let staged = scratch.join(format!("doc-{}", index));
    let mut file = fs::File::create(&staged)?;
    file.write_all(&raw)?;
    drop(file);

    let raw = fs::read(&staged)?;
    Ok(decode_document(&raw))
}

/// Decode document bytes: UTF-8, then any declared encoding, then Windows-1252.
fn decode_document(raw: &[u8]) -> String {
    let raw = strip_bom(raw);
    if let Ok(s) = std::str::from_utf8(raw) {
        return s.to_string();
    }
    let encoding = declared_encoding(raw).unwrap_or(encoding_rs::WINDOWS_1252);
    let (text, _, _) = encoding.decode(raw);
    text.into_owned()
}

/// Look for an `encoding=`/`charset=` declaration near the top of a document.
fn declared_encoding(raw: &[u8]) -> Option<&'static encoding_rs::Encoding> {
    let head = &raw[..raw.len().min(1024)];
    let head = String::from_utf8_lossy(head).to_lowercase();
    for key in ["encoding=", "charset="] {
        if let Some(idx) = head.find(key) {
            let rest = head[idx + key.len()..].trim_start_matches(['"', '\'']);
            let label: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
                .collect();
            if let Some(enc) = encoding_rs::Encoding::for_label(label.as_bytes()) {
                return Some(enc);
            }
        }
    }
    None
}

fn read_archive_file<R: Read + Seek>(archive: &mut ZipArchive<R>, path: &str) -> Result<String> {
    let bytes = read_archive_file_bytes(archive, path)?;
    let bytes = strip_bom(&bytes);
    Ok(String::from_utf8(bytes.to_vec())?)
}

fn read_archive_file_bytes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    path: &str,
) -> Result<Vec<u8>> {
    match archive.by_name(path) {
        Ok(mut file) => {
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)?;
            return Ok(contents);
        }
        Err(ZipError::FileNotFound) => {}
        Err(e) => return Err(e.into()),
    }

    // Fallback: percent-decoded path, for archives whose manifest hrefs are
    // URL-encoded.
    let decoded = percent_encoding::percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| Error::DocumentUnreadable(format!("invalid UTF-8 in path: {}", path)))?;

    let mut file = archive.by_name(&decoded)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

fn resolve_path(base: &str, href: &str) -> String {
    if base.is_empty() {
        href.to_string()
    } else {
        format!("{}/{}", base, href)
    }
}
