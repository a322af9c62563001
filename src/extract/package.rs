//! Package-document parsing (container.xml and OPF).

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{Error, Result};

/// Parsed OPF package data.
pub struct PackageDoc {
    pub title: Option<String>,
    pub author: Option<String>,
    /// Maps manifest id -> (href, media_type).
    pub manifest: HashMap<String, (String, String)>,
    /// Manifest ids in declaration order, for the spine-less fallback.
    pub manifest_order: Vec<String>,
    pub spine_ids: Vec<String>,
}

impl PackageDoc {
    /// Content documents in reading order: spine entries resolved through the
    /// manifest, or every manifest-declared text document when the spine
    /// resolves to nothing.
    pub fn reading_order(&self) -> Vec<String> {
        let from_spine: Vec<String> = self
            .spine_ids
            .iter()
            .filter_map(|id| self.manifest.get(id))
            .filter(|(_, media_type)| is_text_document(media_type))
            .map(|(href, _)| href.clone())
            .collect();

        if !from_spine.is_empty() {
            return from_spine;
        }

        self.manifest_order
            .iter()
            .filter_map(|id| self.manifest.get(id))
            .filter(|(_, media_type)| is_text_document(media_type))
            .map(|(href, _)| href.clone())
            .collect()
    }
}

/// Media types treated as extractable text content.
pub fn is_text_document(media_type: &str) -> bool {
    matches!(
        media_type,
        "application/xhtml+xml" | "text/html" | "application/html" | "text/x-oeb1-document"
    )
}

/// Parse META-INF/container.xml to find the package document path.
pub fn parse_container(bytes: &[u8]) -> Result<String> {
    let content = String::from_utf8(strip_bom(bytes).to_vec())?;

    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.name().as_ref() == b"rootfile" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"full-path" {
                        let path = String::from_utf8(attr.value.to_vec())?;
                        if path.is_empty() {
                            return Err(Error::ContainerMalformed(
                                "rootfile has empty full-path".into(),
                            ));
                        }
                        return Ok(path);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    Err(Error::ContainerMalformed(
        "no rootfile found in container.xml".into(),
    ))
}

/// Parse the OPF package document into manifest, spine, and basic metadata.
pub fn parse_package(content: &str) -> Result<PackageDoc> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut title: Option<String> = None;
    let mut author: Option<String> = None;
    let mut manifest: HashMap<String, (String, String)> = HashMap::new();
    let mut manifest_order: Vec<String> = Vec::new();
    let mut spine_ids: Vec<String> = Vec::new();

    let mut in_metadata = false;
    let mut current_element: Option<&'static str> = None;
    let mut buf_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());

                match local {
                    b"metadata" => in_metadata = true,
                    b"title" if in_metadata => {
                        current_element = Some("title");
                        buf_text.clear();
                    }
                    b"creator" if in_metadata => {
                        current_element = Some("creator");
                        buf_text.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());

                match local {
                    b"item" => {
                        let mut id = String::new();
                        let mut href = String::new();
                        let mut media_type = String::new();

                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"id" => id = String::from_utf8(attr.value.to_vec())?,
                                b"href" => href = String::from_utf8(attr.value.to_vec())?,
                                b"media-type" => {
                                    media_type = String::from_utf8(attr.value.to_vec())?
                                }
                                _ => {}
                            }
                        }

                        if !id.is_empty() && !href.is_empty() {
                            manifest_order.push(id.clone());
                            manifest.insert(id, (href, media_type));
                        }
                    }
                    b"itemref" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"idref" {
                                spine_ids.push(String::from_utf8(attr.value.to_vec())?);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if current_element.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if current_element.is_some() {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    if let Some(resolved) = resolve_entity(&entity) {
                        buf_text.push_str(&resolved);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());

                if local == b"metadata" {
                    in_metadata = false;
                }

                match current_element {
                    Some("title") if local == b"title" => {
                        if title.is_none() && !buf_text.trim().is_empty() {
                            title = Some(buf_text.trim().to_string());
                        }
                        current_element = None;
                    }
                    Some("creator") if local == b"creator" => {
                        if author.is_none() && !buf_text.trim().is_empty() {
                            author = Some(buf_text.trim().to_string());
                        }
                        current_element = None;
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    Ok(PackageDoc {
        title,
        author,
        manifest,
        manifest_order,
        spine_ids,
    })
}

/// Strip UTF-8 BOM if present.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    }
}

/// Extract local name from namespaced XML name (e.g., "dc:title" -> "title").
fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// Resolve XML entity references.
fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        _ => {}
    }

    if let Some(hex) = entity.strip_prefix("#x") {
        if let Ok(code) = u32::from_str_radix(hex, 16)
            && let Some(c) = char::from_u32(code)
        {
            return Some(c.to_string());
        }
    } else if let Some(dec) = entity.strip_prefix('#')
        && let Ok(code) = dec.parse::<u32>()
        && let Some(c) = char::from_u32(code)
    {
        return Some(c.to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_bom() {
        let with_bom = &[0xEF, 0xBB, 0xBF, b'h', b'i'];
        assert_eq!(strip_bom(with_bom), b"hi");
        assert_eq!(strip_bom(b"hello"), b"hello");
        assert_eq!(strip_bom(&[]), &[] as &[u8]);
        // Partial BOM is not stripped
        let partial = &[0xEF, 0xBB, b'x'];
        assert_eq!(strip_bom(partial), partial);
    }

    #[test]
    fn test_local_name() {
        assert_eq!(local_name(b"title"), b"title");
        assert_eq!(local_name(b"dc:title"), b"title");
        assert_eq!(local_name(b""), b"");
    }

    #[test]
    fn test_parse_container() {
        let container = br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

        assert_eq!(parse_container(container).unwrap(), "OEBPS/content.opf");
    }

    #[test]
    fn test_parse_container_with_bom() {
        let mut container = vec![0xEF, 0xBB, 0xBF];
        container.extend_from_slice(br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#);

        assert_eq!(parse_container(&container).unwrap(), "content.opf");
    }

    #[test]
    fn test_parse_container_no_rootfile() {
        let container = br#"<?xml version="1.0"?><container><rootfiles/></container>"#;
        assert!(matches!(
            parse_container(container),
            Err(Error::ContainerMalformed(_))
        ));
    }

    #[test]
    fn test_parse_package() {
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Test Book</dc:title>
    <dc:creator>Author One</dc:creator>
  </metadata>
  <manifest>
    <item id="ch1" href="chapter1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="chapter2.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="style.css" media-type="text/css"/>
  </manifest>
  <spine>
    <itemref idref="ch2"/>
    <itemref idref="ch1"/>
  </spine>
</package>"#;

        let pkg = parse_package(opf).unwrap();
        assert_eq!(pkg.title.as_deref(), Some("Test Book"));
        assert_eq!(pkg.author.as_deref(), Some("Author One"));
        assert_eq!(pkg.spine_ids, vec!["ch2", "ch1"]);
        // Spine order wins over declaration order.
        assert_eq!(
            pkg.reading_order(),
            vec!["chapter2.xhtml", "chapter1.xhtml"]
        );
    }

    #[test]
    fn test_reading_order_falls_back_to_manifest() {
        let opf = r#"<?xml version="1.0"?>
<package version="3.0">
  <manifest>
    <item id="a" href="a.xhtml" media-type="application/xhtml+xml"/>
    <item id="b" href="b.html" media-type="text/html"/>
    <item id="img" href="cover.jpg" media-type="image/jpeg"/>
  </manifest>
  <spine>
    <itemref idref="missing"/>
  </spine>
</package>"#;

        let pkg = parse_package(opf).unwrap();
        assert_eq!(pkg.reading_order(), vec!["a.xhtml", "b.html"]);
    }

    #[test]
    fn test_reading_order_skips_non_text_spine_entries() {
        let opf = r#"<?xml version="1.0"?>
<package version="3.0">
  <manifest>
    <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="img" href="cover.jpg" media-type="image/jpeg"/>
  </manifest>
  <spine>
    <itemref idref="img"/>
    <itemref idref="ch1"/>
  </spine>
</package>"#;

        let pkg = parse_package(opf).unwrap();
        assert_eq!(pkg.reading_order(), vec!["ch1.xhtml"]);
    }

    #[test]
    fn test_parse_package_entity_in_title() {
        let opf = r#"<package><metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
<dc:title>Don&apos;t Stop</dc:title></metadata>
<manifest/><spine/></package>"#;
        let pkg = parse_package(opf).unwrap();
        assert_eq!(pkg.title.as_deref(), Some("Don't Stop"));
    }
}
