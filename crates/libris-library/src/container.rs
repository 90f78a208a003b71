//! Container descriptor lookup
//!
//! Every EPUB carries `META-INF/container.xml`, which names the package
//! document. The package document may live anywhere inside the archive.

use crate::archive::decode_text;
use crate::{Archive, ParseError};
use roxmltree::{Document, ParsingOptions};
use std::io::{Read, Seek};

/// Fixed location of the container descriptor
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Media type of an OPF package document rootfile
pub const PACKAGE_MEDIA_TYPE: &str = "application/oebps-package+xml";

/// Find the package document path declared by the archive's container
pub fn resolve_package_path<R: Read + Seek>(
    archive: &mut Archive<R>,
) -> Result<String, ParseError> {
    let bytes = archive.read_document(CONTAINER_PATH).map_err(|e| match e {
        ParseError::EntryNotFound(_) => ParseError::ContainerMissing,
        other => other,
    })?;
    let xml = decode_text(bytes).map_err(ParseError::ContainerMalformed)?;
    parse_container(&xml)
}

/// Extract the primary rootfile path from container XML
///
/// The first rootfile with the OPF media type wins; without one, the first
/// rootfile is used.
pub fn parse_container(xml: &str) -> Result<String, ParseError> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(xml, options)
        .map_err(|e| ParseError::ContainerMalformed(e.to_string()))?;

    let rootfiles: Vec<_> = doc
        .descendants()
        .filter(|n| n.tag_name().name() == "rootfile")
        .collect();

    let primary = rootfiles
        .iter()
        .find(|n| n.attribute("media-type") == Some(PACKAGE_MEDIA_TYPE))
        .or_else(|| rootfiles.first())
        .ok_or(ParseError::NoRootfileDeclared)?;

    match primary.attribute("full-path").map(str::trim) {
        Some(path) if !path.is_empty() => Ok(path.trim_start_matches('/').to_string()),
        _ => Err(ParseError::NoRootfileDeclared),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{CONTAINER_XML, epub_archive, package_xml, zip_bytes, zip_raw};
    use crate::archive::MAX_DOCUMENT_BYTES;
    use std::io::Cursor;

    #[test]
    fn test_parse_standard_container() {
        assert_eq!(parse_container(CONTAINER_XML).unwrap(), "OEBPS/content.opf");
    }

    #[test]
    fn test_prefers_package_rootfile() {
        let xml = r#"<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
            <rootfiles>
              <rootfile full-path="book.pdf" media-type="application/pdf"/>
              <rootfile full-path="book/package.opf" media-type="application/oebps-package+xml"/>
            </rootfiles>
          </container>"#;
        assert_eq!(parse_container(xml).unwrap(), "book/package.opf");
    }

    #[test]
    fn test_missing_full_path() {
        let xml = r#"<container><rootfiles><rootfile full-path="  "/></rootfiles></container>"#;
        assert!(matches!(
            parse_container(xml),
            Err(ParseError::NoRootfileDeclared)
        ));

        let xml = r#"<container><rootfiles/></container>"#;
        assert!(matches!(
            parse_container(xml),
            Err(ParseError::NoRootfileDeclared)
        ));
    }

    #[test]
    fn test_malformed_container() {
        assert!(matches!(
            parse_container("<container><rootfiles>"),
            Err(ParseError::ContainerMalformed(_))
        ));
    }

    #[test]
    fn test_resolve_from_archive() {
        let mut archive = epub_archive(&package_xml("urn:isbn:1", &["A"], &["en"]));
        assert_eq!(
            resolve_package_path(&mut archive).unwrap(),
            "OEBPS/content.opf"
        );
    }

    #[test]
    fn test_resolve_utf16_container() {
        let xml = CONTAINER_XML.replace("UTF-8", "UTF-16");
        let mut bytes = vec![0xff, 0xfe];
        for unit in xml.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let data = zip_raw(&[(CONTAINER_PATH, bytes.as_slice())]);
        let mut archive = Archive::from_reader(Cursor::new(data)).unwrap();

        assert_eq!(
            resolve_package_path(&mut archive).unwrap(),
            "OEBPS/content.opf"
        );
    }

    #[test]
    fn test_oversized_container_is_corrupt() {
        let xml = format!("{CONTAINER_XML}{}", " ".repeat(MAX_DOCUMENT_BYTES as usize));
        let data = zip_bytes(&[(CONTAINER_PATH, xml.as_str())]);
        let mut archive = Archive::from_reader(Cursor::new(data)).unwrap();

        assert!(matches!(
            resolve_package_path(&mut archive),
            Err(ParseError::CorruptEntry { .. })
        ));
    }

    #[test]
    fn test_resolve_without_container() {
        let data = zip_bytes(&[("mimetype", "application/epub+zip")]);
        let mut archive = Archive::from_reader(Cursor::new(data)).unwrap();
        assert!(matches!(
            resolve_package_path(&mut archive),
            Err(ParseError::ContainerMissing)
        ));
    }
}
