//! ZIP/XML to JSON conversion
//!
//! Backs the `zipped-xml-to-json` binary launched by the extractor. The XML
//! entry is rendered with the usual attribute/text conventions:
//!
//! - attributes become `"@name"` keys
//! - element text sits under `"#text"` when the element also has attributes or children
//! - an element with neither becomes its trimmed text, or `null` when empty
//! - repeated child elements collapse into an array, in document order
//!
//! Only one child of the root element is held in memory at a time. The entry is
//! read once to learn the root's shape and then once more per distinct child
//! name, so children are written grouped by name in order of first appearance.

use crate::error::{IngestError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use std::fmt::Display;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

use crate::models::TEXT_KEY;

const ATTRIBUTE_PREFIX: char = '@';

/// What a conversion produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSummary {
    /// Name of the document element
    pub root: String,
    /// Elements written directly below the root
    pub entries: usize,
}

/// Convert the XML `entry` of `archive` into a JSON document at `output`
pub fn convert_archive(archive: &Path, entry: &str, output: &Path) -> Result<ConversionSummary> {
    let file = File::open(archive).map_err(|e| {
        IngestError::Conversion(format!("cannot open archive {}: {}", archive.display(), e))
    })?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;

    let out = File::create(output).map_err(|e| {
        IngestError::Conversion(format!("cannot create {}: {}", output.display(), e))
    })?;
    let mut writer = BufWriter::new(out);

    let summary = write_document(&mut zip, entry, &mut writer)?;
    writer.flush().map_err(write_error)?;

    Ok(summary)
}

/// Stream the JSON rendition of `entry` into `writer`
pub fn write_document<R, W>(
    zip: &mut ZipArchive<R>,
    entry: &str,
    writer: &mut W,
) -> Result<ConversionSummary>
where
    R: Read + Seek,
    W: Write,
{
    let outline = scan_outline(open_entry(zip, entry)?)?;
    debug!(root = %outline.root, children = outline.children.len(), "Scanned document outline");

    write_raw(writer, "{")?;
    write_json(writer, &Value::String(outline.root.clone()))?;
    write_raw(writer, ":")?;

    let text = outline.text.trim();
    let mut entries = 0;

    if outline.attributes.is_empty() && outline.children.is_empty() {
        let leaf = if text.is_empty() {
            Value::Null
        } else {
            Value::String(text.to_string())
        };
        write_json(writer, &leaf)?;
    } else {
        write_raw(writer, "{")?;
        let mut first = true;

        for (name, value) in &outline.attributes {
            write_key(writer, &mut first, name)?;
            write_json(writer, &Value::String(value.clone()))?;
        }

        for (name, count) in &outline.children {
            write_key(writer, &mut first, name)?;
            let repeated = *count > 1;
            if repeated {
                write_raw(writer, "[")?;
            }

            let mut written = 0usize;
            stream_children(open_entry(zip, entry)?, name, |value| {
                if written > 0 {
                    write_raw(writer, ",")?;
                }
                written += 1;
                write_json(writer, &value)
            })?;
            entries += written;

            if repeated {
                write_raw(writer, "]")?;
            }
        }

        if !text.is_empty() {
            write_key(writer, &mut first, TEXT_KEY)?;
            write_json(writer, &Value::String(text.to_string()))?;
        }
        write_raw(writer, "}")?;
    }

    write_raw(writer, "}")?;

    Ok(ConversionSummary {
        root: outline.root,
        entries,
    })
}

fn open_entry<'a, R: Read + Seek>(
    zip: &'a mut ZipArchive<R>,
    entry: &str,
) -> Result<Reader<BufReader<impl Read + 'a>>> {
    let file = zip.by_name(entry).map_err(|e| {
        IngestError::Conversion(format!("cannot read entry '{}': {}", entry, e))
    })?;
    Ok(Reader::from_reader(BufReader::new(file)))
}

/// Root element name, attributes, direct text and child name counts
#[derive(Debug, Default)]
struct Outline {
    root: String,
    attributes: Vec<(String, String)>,
    children: Vec<(String, usize)>,
    text: String,
}

fn scan_outline<R: BufRead>(mut reader: Reader<R>) -> Result<Outline> {
    let mut outline = Outline::default();
    let mut seen_root = false;
    let mut depth = 0usize;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                if depth == 0 {
                    seen_root = set_root(&mut outline, &e, seen_root)?;
                } else if depth == 1 {
                    count_child(&mut outline.children, element_name(&e)?);
                }
                depth += 1;
            },
            Event::Empty(e) => {
                if depth == 0 {
                    seen_root = set_root(&mut outline, &e, seen_root)?;
                } else if depth == 1 {
                    count_child(&mut outline.children, element_name(&e)?);
                }
            },
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Text(t) if depth == 1 => outline.text.push_str(&t.unescape().map_err(xml_error)?),
            Event::CData(c) if depth == 1 => outline.text.push_str(&String::from_utf8_lossy(&c)),
            Event::Eof => break,
            _ => {},
        }
        buf.clear();
    }

    if !seen_root {
        return Err(IngestError::Conversion(
            "document has no root element".to_string(),
        ));
    }

    Ok(outline)
}

fn set_root(outline: &mut Outline, start: &BytesStart<'_>, seen_root: bool) -> Result<bool> {
    if seen_root {
        return Err(IngestError::Conversion(
            "document has more than one root element".to_string(),
        ));
    }
    outline.root = element_name(start)?;
    outline.attributes = attributes(start)?;
    Ok(true)
}

fn count_child(children: &mut Vec<(String, usize)>, name: String) {
    match children.iter_mut().find(|(n, _)| *n == name) {
        Some((_, count)) => *count += 1,
        None => children.push((name, 1)),
    }
}

/// Hand every child of the root named `name` to `emit`, in document order
fn stream_children<R, F>(mut reader: Reader<R>, name: &str, mut emit: F) -> Result<()>
where
    R: BufRead,
    F: FnMut(Value) -> Result<()>,
{
    let mut depth = 0usize;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                if depth == 1 && element_name(&e)? == name {
                    let value = read_element(&mut reader, &e)?;
                    emit(value)?;
                } else {
                    depth += 1;
                }
            },
            Event::Empty(e) => {
                if depth == 1 && element_name(&e)? == name {
                    emit(Node::new(&e)?.finish())?;
                }
            },
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {},
        }
        buf.clear();
    }

    Ok(())
}

/// Build the value of an element whose start tag has just been read
fn read_element<R: BufRead>(reader: &mut Reader<R>, start: &BytesStart<'_>) -> Result<Value> {
    let mut node = Node::new(start)?;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let child = read_element(reader, &e)?;
                node.push_child(element_name(&e)?, child);
            },
            Event::Empty(e) => {
                let child = Node::new(&e)?.finish();
                node.push_child(element_name(&e)?, child);
            },
            Event::Text(t) => node.text.push_str(&t.unescape().map_err(xml_error)?),
            Event::CData(c) => node.text.push_str(&String::from_utf8_lossy(&c)),
            Event::End(_) => return Ok(node.finish()),
            Event::Eof => {
                return Err(IngestError::Conversion(format!(
                    "unexpected end of document inside <{}>",
                    element_name(start)?
                )))
            },
            _ => {},
        }
        buf.clear();
    }
}

/// An element being assembled
struct Node {
    fields: Map<String, Value>,
    text: String,
}

impl Node {
    fn new(start: &BytesStart<'_>) -> Result<Self> {
        let fields = attributes(start)?
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        Ok(Self {
            fields,
            text: String::new(),
        })
    }

    fn push_child(&mut self, name: String, value: Value) {
        match self.fields.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            },
            None => {
                self.fields.insert(name, value);
            },
        }
    }

    fn finish(mut self) -> Value {
        let text = self.text.trim();
        if self.fields.is_empty() {
            return if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.to_string())
            };
        }
        if !text.is_empty() {
            self.fields
                .insert(TEXT_KEY.to_string(), Value::String(text.to_string()));
        }
        Value::Object(self.fields)
    }
}

fn element_name(start: &BytesStart<'_>) -> Result<String> {
    std::str::from_utf8(start.name().as_ref())
        .map(str::to_string)
        .map_err(xml_error)
}

fn attributes(start: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    start
        .attributes()
        .map(|attr| {
            let attr = attr.map_err(xml_error)?;
            let key = std::str::from_utf8(attr.key.as_ref()).map_err(xml_error)?;
            let value = attr.unescape_value().map_err(xml_error)?;
            Ok((format!("{}{}", ATTRIBUTE_PREFIX, key), value.into_owned()))
        })
        .collect()
}

fn write_key<W: Write>(writer: &mut W, first: &mut bool, key: &str) -> Result<()> {
    if !*first {
        write_raw(writer, ",")?;
    }
    *first = false;
    write_json(writer, &Value::String(key.to_string()))?;
    write_raw(writer, ":")
}

fn write_raw<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    writer.write_all(s.as_bytes()).map_err(write_error)
}

fn write_json<W: Write>(writer: &mut W, value: &Value) -> Result<()> {
    serde_json::to_writer(writer, value).map_err(write_error)
}

fn xml_error(err: impl Display) -> IngestError {
    IngestError::Conversion(format!("malformed XML: {}", err))
}

fn write_error(err: impl Display) -> IngestError {
    IngestError::Conversion(format!("failed to write JSON: {}", err))
}
