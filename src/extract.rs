//! Plain-text extraction for PDF, EPUB and text files.
//!
//! [`extract_text`] never fails: any parser error is logged and turned into
//! empty text so that ingestion can continue over the rest of the corpus.
//! [`extract_file`] is the typed variant underneath it.

use std::io::{Cursor, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::config::{path_suffix, Settings};
use crate::error::ExtractError;

/// Maximum decompressed bytes read from a single EPUB entry (zip-bomb guard).
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";

/// Extract plain text from `path`, returning an empty string on any failure.
pub fn extract_text(path: &Path, settings: &Settings) -> String {
    match extract_file(path, settings) {
        Ok(text) => text,
        Err(ExtractError::UnsupportedSuffix(suffix)) => {
            tracing::debug!(path = %path.display(), %suffix, "unsupported suffix, skipping");
            String::new()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "text extraction failed");
            String::new()
        }
    }
}

/// Extract plain text from `path`, dispatching on its lowercase suffix.
pub fn extract_file(path: &Path, settings: &Settings) -> Result<String, ExtractError> {
    let suffix = path_suffix(path);
    match suffix.as_str() {
        ".pdf" => extract_pdf(&std::fs::read(path)?),
        ".epub" => extract_epub(&std::fs::read(path)?),
        s if settings.is_text(s) => Ok(decode_text(std::fs::read(path)?)),
        _ => Err(ExtractError::UnsupportedSuffix(suffix)),
    }
}

/// UTF-8 decode, replacing undecodable bytes instead of failing.
pub fn decode_text(bytes: Vec<u8>) -> String {
    let text = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    };
    match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    }
}

/// Page text in document order. `pdf-extract` can panic on malformed
/// input, so the call is isolated.
pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    match panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(bytes)
    })) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked".to_string())),
    }
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

/// Body text of every XHTML document item, in manifest order.
pub fn extract_epub(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::Epub(e.to_string()))?;

    let documents = if archive.index_for_name("META-INF/container.xml").is_some() {
        let container = read_entry(&mut archive, "META-INF/container.xml")?;
        let opf_path = rootfile_path(&container)?;
        let opf = read_entry(&mut archive, &opf_path)?;
        manifest_documents(&opf, &opf_path)?
    } else {
        html_entries(&mut archive)?
    };

    let mut parts = Vec::new();
    for name in documents {
        if archive.index_for_name(&name).is_none() {
            tracing::warn!(entry = %name, "manifest item missing from archive, skipping");
            continue;
        }
        let xhtml = read_entry(&mut archive, &name)?;
        let text = body_text(&xhtml)?;
        if !text.trim().is_empty() {
            parts.push(text);
        }
    }
    Ok(parts.join("\n"))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<String, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Epub(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry.take(MAX_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_ENTRY_BYTES {
        return Err(ExtractError::Epub(format!(
            "entry {} exceeds size limit ({} bytes)",
            name, MAX_ENTRY_BYTES
        )));
    }
    Ok(decode_text(out))
}

/// Fallback for archives without a container file: HTML entries in archive order.
fn html_entries(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    let mut names = Vec::new();
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| ExtractError::Epub(e.to_string()))?;
        let name = entry.name().to_string();
        let lower = name.to_lowercase();
        if lower.ends_with(".xhtml") || lower.ends_with(".html") || lower.ends_with(".htm") {
            names.push(name);
        }
    }
    Ok(names)
}

fn rootfile_path(container_xml: &str) -> Result<String, ExtractError> {
    let mut reader = Reader::from_str(container_xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"rootfile" => {
                if let Some(path) = attr_value(&e, b"full-path") {
                    return Ok(path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Epub(e.to_string())),
            _ => {}
        }
    }
    Err(ExtractError::Epub(
        "container.xml has no rootfile".to_string(),
    ))
}

/// Archive paths of XHTML manifest items, resolved against the OPF location.
/// Navigation documents are excluded.
fn manifest_documents(opf_xml: &str, opf_path: &str) -> Result<Vec<String>, ExtractError> {
    let base = match opf_path.rfind('/') {
        Some(pos) => &opf_path[..pos],
        None => "",
    };
    let mut reader = Reader::from_str(opf_xml);
    let mut docs = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"item" => {
                let media_type = attr_value(&e, b"media-type").unwrap_or_default();
                let is_nav = attr_value(&e, b"properties")
                    .map(|p| p.split_whitespace().any(|v| v == "nav"))
                    .unwrap_or(false);
                if media_type == XHTML_MEDIA_TYPE && !is_nav {
                    if let Some(href) = attr_value(&e, b"href") {
                        let href = href.split('#').next().unwrap_or_default();
                        docs.push(resolve_href(base, href));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Epub(e.to_string())),
            _ => {}
        }
    }
    Ok(docs)
}

/// Join a manifest `href` onto the OPF directory: percent-decode it and
/// collapse `.` and `..` segments. `..` never climbs above the archive root.
fn resolve_href(base: &str, href: &str) -> String {
    let decoded = urlencoding::decode(href)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| href.to_string());
    let mut segments: Vec<&str> = Vec::new();
    let prefix = if decoded.starts_with('/') { "" } else { base };
    for segment in prefix.split('/').chain(decoded.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Text content of the `<body>` element, one line per block element.
fn body_text(xhtml: &str) -> Result<String, ExtractError> {
    let mut reader = Reader::from_str(xhtml);
    reader.config_mut().check_end_names = false;

    let mut out = String::new();
    let mut in_body = false;
    let mut skip_depth = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"body" => in_body = true,
                b"script" | b"style" => skip_depth += 1,
                _ => {}
            },
            Ok(Event::End(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"body" => in_body = false,
                    b"script" | b"style" => skip_depth = skip_depth.saturating_sub(1),
                    n if in_body && is_block(n) => out.push('\n'),
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) if in_body && e.local_name().as_ref() == b"br" => out.push('\n'),
            Ok(Event::Text(t)) if in_body && skip_depth == 0 => match t.unescape() {
                Ok(s) => out.push_str(&s),
                Err(_) => out.push_str(&String::from_utf8_lossy(&t)),
            },
            Ok(Event::CData(t)) if in_body && skip_depth == 0 => {
                out.push_str(&String::from_utf8_lossy(&t));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Epub(e.to_string())),
            _ => {}
        }
    }

    let lines: Vec<&str> = out
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    Ok(lines.join("\n"))
}

fn is_block(name: &[u8]) -> bool {
    matches!(
        name,
        b"p" | b"div"
            | b"h1"
            | b"h2"
            | b"h3"
            | b"h4"
            | b"h5"
            | b"h6"
            | b"li"
            | b"tr"
            | b"blockquote"
            | b"section"
            | b"pre"
    )
}
