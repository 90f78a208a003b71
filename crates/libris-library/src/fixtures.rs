//! In-memory EPUB fixtures shared by the unit tests

use crate::Archive;
use std::io::{Cursor, Write};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

pub const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

/// Build a ZIP archive from `(name, contents)` pairs
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let raw: Vec<(&str, &[u8])> = entries
        .iter()
        .map(|(name, contents)| (*name, contents.as_bytes()))
        .collect();
    zip_raw(&raw)
}

/// Build a ZIP archive from `(name, bytes)` pairs
pub fn zip_raw(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Minimal package document
pub fn package_xml(identifier: &str, titles: &[&str], languages: &[&str]) -> String {
    let mut metadata = format!(r#"<dc:identifier id="uid">{identifier}</dc:identifier>"#);
    for title in titles {
        metadata.push_str(&format!("<dc:title>{title}</dc:title>"));
    }
    for language in languages {
        metadata.push_str(&format!("<dc:language>{language}</dc:language>"));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">{metadata}</metadata>
  <manifest>
    <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
</package>"#
    )
}

/// EPUB archive with the standard container pointing at `OEBPS/content.opf`
pub fn epub_archive(package: &str) -> Archive<Cursor<Vec<u8>>> {
    let data = zip_bytes(&[
        ("mimetype", "application/epub+zip"),
        ("META-INF/container.xml", CONTAINER_XML),
        ("OEBPS/content.opf", package),
    ]);
    Archive::from_reader(Cursor::new(data)).unwrap()
}
