//! Package document metadata extraction

use crate::archive::decode_text;
use crate::{Archive, ParseError};
use roxmltree::{Document, Node, ParsingOptions};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Seek};

/// A creator with its sortable form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Author {
    pub name: String,
    /// "Last, First" style sort key
    pub file_as: String,
}

impl Author {
    /// Author with a sort key derived from the display name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let file_as = derive_file_as(&name);
        Self { name, file_as }
    }

    pub fn with_file_as(name: impl Into<String>, file_as: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_as: file_as.into(),
        }
    }
}

/// Normalized bibliographic record for one archive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BookMetadata {
    /// Package unique identifier (ISBN, UUID, ...)
    pub identifier: String,
    /// Titles in document order
    pub titles: Vec<String>,
    /// Declared languages, duplicates removed
    pub languages: Vec<String>,
    pub authors: Vec<Author>,
    pub has_cover: bool,
    /// Archive entry holding the cover image
    pub cover_href: Option<String>,
    pub cover_media_type: Option<String>,
    /// Archive path relative to the library root
    pub filename: String,
    /// Package document location inside the archive
    pub package_path: String,
}

/// Read and parse the package document at `package_path`
///
/// `label` is the archive's path relative to the library root and is what
/// gets persisted as the book's filename.
pub fn extract_metadata<R: Read + Seek>(
    archive: &mut Archive<R>,
    package_path: &str,
    label: &str,
) -> Result<BookMetadata, ParseError> {
    let bytes = archive.read_document(package_path).map_err(|e| match e {
        ParseError::EntryNotFound(name) => ParseError::PackageMissing(name),
        other => other,
    })?;
    let xml = decode_text(bytes).map_err(ParseError::PackageMalformed)?;
    parse_package(&xml, package_path, label)
}

/// Parse package document XML into a [`BookMetadata`]
pub fn parse_package(
    xml: &str,
    package_path: &str,
    label: &str,
) -> Result<BookMetadata, ParseError> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(xml, options)
        .map_err(|e| ParseError::PackageMalformed(e.to_string()))?;

    let package = doc.root_element();
    let metadata = child_element(package, "metadata")
        .ok_or_else(|| ParseError::PackageMalformed("no metadata element".to_string()))?;
    let fields: Vec<Node> = metadata.descendants().filter(Node::is_element).collect();

    let identifier = unique_identifier(package, &fields)
        .ok_or(ParseError::RequiredFieldMissing("identifier"))?;

    let titles: Vec<String> = named(&fields, "title")
        .map(text_of)
        .filter(|t| !t.is_empty())
        .collect();
    if titles.is_empty() {
        tracing::warn!("{}: package document declares no title", label);
    }

    let mut languages: Vec<String> = Vec::new();
    for language in named(&fields, "language").map(text_of) {
        if !language.is_empty() && !languages.contains(&language) {
            languages.push(language);
        }
    }

    let refinements = file_as_refinements(&fields);
    let authors = named(&fields, "creator")
        .filter_map(|creator| {
            let name = text_of(creator);
            if name.is_empty() {
                return None;
            }
            let file_as = creator
                .attributes()
                .find(|a| a.name() == "file-as")
                .map(|a| a.value().trim().to_string())
                .filter(|v| !v.is_empty())
                .or_else(|| {
                    creator
                        .attribute("id")
                        .and_then(|id| refinements.get(id).cloned())
                })
                .unwrap_or_else(|| derive_file_as(&name));
            Some(Author { name, file_as })
        })
        .collect();

    let cover = cover_item(package, &fields);
    let cover_href = cover
        .and_then(|item| item.attribute("href"))
        .map(|href| resolve_href(package_path, href));
    let cover_media_type = cover
        .and_then(|item| item.attribute("media-type"))
        .map(str::to_string);

    Ok(BookMetadata {
        identifier,
        titles,
        languages,
        authors,
        has_cover: cover_href.is_some(),
        cover_href,
        cover_media_type,
        filename: label.to_string(),
        package_path: package_path.to_string(),
    })
}

/// Sort key for a display name: "Jane Q. Doe" becomes "Doe, Jane Q."
///
/// Names that already contain a comma, or are a single word, are kept.
pub fn derive_file_as(name: &str) -> String {
    let words: Vec<&str> = name.split_whitespace().collect();
    let joined = words.join(" ");
    if joined.contains(',') {
        return joined;
    }
    match words.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{}, {}", last, rest.join(" ")),
        _ => joined,
    }
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn named<'f, 'a, 'input>(
    fields: &'f [Node<'a, 'input>],
    name: &'f str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'f {
    fields
        .iter()
        .copied()
        .filter(move |n| n.tag_name().name() == name)
}

/// Element text with whitespace collapsed
fn text_of(node: Node) -> String {
    let raw: String = node
        .descendants()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect();
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The identifier named by `unique-identifier`, else the first non-empty one
fn unique_identifier(package: Node, fields: &[Node]) -> Option<String> {
    let referenced = package.attribute("unique-identifier").and_then(|id| {
        named(fields, "identifier")
            .find(|n| n.attribute("id") == Some(id))
            .map(text_of)
            .filter(|t| !t.is_empty())
    });
    referenced.or_else(|| {
        named(fields, "identifier")
            .map(text_of)
            .find(|t| !t.is_empty())
    })
}

/// EPUB 3 `<meta refines="#id" property="file-as">` values keyed by id
fn file_as_refinements<'a>(fields: &[Node<'a, '_>]) -> HashMap<&'a str, String> {
    let mut refinements = HashMap::new();
    for meta in named(fields, "meta") {
        if meta.attribute("property") != Some("file-as") {
            continue;
        }
        let Some(target) = meta.attribute("refines") else {
            continue;
        };
        let value = text_of(meta);
        if !value.is_empty() {
            refinements
                .entry(target.trim_start_matches('#'))
                .or_insert(value);
        }
    }
    refinements
}

/// Manifest item holding the cover image
///
/// EPUB 3 flags it with `properties="cover-image"`; EPUB 2 points at it from
/// `<meta name="cover" content="item-id"/>`.
fn cover_item<'a, 'input>(
    package: Node<'a, 'input>,
    fields: &[Node<'a, 'input>],
) -> Option<Node<'a, 'input>> {
    let manifest = child_element(package, "manifest")?;
    let items: Vec<Node> = manifest
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "item")
        .collect();

    let flagged = items.iter().copied().find(|item| {
        item.attribute("properties")
            .is_some_and(|p| p.split_whitespace().any(|p| p == "cover-image"))
    });
    if flagged.is_some() {
        return flagged;
    }

    let reference = named(fields, "meta")
        .find(|m| m.attribute("name") == Some("cover"))
        .and_then(|m| m.attribute("content"))?;
    items.into_iter().find(|item| {
        item.attribute("id") == Some(reference) || item.attribute("href") == Some(reference)
    })
}

/// Resolve a manifest href against the package document's directory
fn resolve_href(package_path: &str, href: &str) -> String {
    let href = urlencoding::decode(href)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| href.to_string());
    let base = package_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");

    let mut segments: Vec<&str> = Vec::new();
    for segment in base.split('/').chain(href.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}
