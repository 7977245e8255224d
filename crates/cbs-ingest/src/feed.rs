//! Atom feed parsing and entry flattening
//!
//! CBS serves every collection as an Atom feed whose `<entry>` elements carry
//! an `<m:properties>` block of `d:`-prefixed property elements:
//!
//! ```xml
//! <entry>
//!   <content type="application/xml">
//!     <m:properties>
//!       <d:Key>GM0363</d:Key>
//!       <d:Title>Amsterdam</d:Title>
//!       <d:Description m:null="true" />
//!     </m:properties>
//!   </content>
//! </entry>
//! ```
//!
//! Matching is on namespace URI, not prefix.

use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use crate::error::{IngestError, IngestResult};
use crate::models::{EntityKind, FlatRecord};

pub const ATOM_NS: &[u8] = b"http://www.w3.org/2005/Atom";
pub const DATA_NS: &[u8] = b"http://schemas.microsoft.com/ado/2007/08/dataservices";

/// Property values of one `<entry>`, in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    properties: Vec<(String, Option<String>)>,
}

impl FeedEntry {
    /// Record a property unless one with the same name was already seen
    pub fn push(&mut self, name: String, value: Option<String>) {
        if !self.properties.iter().any(|(n, _)| *n == name) {
            self.properties.push((name, value));
        }
    }

    /// Text of the named property; `None` when absent or empty
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Extract `kind`'s mapped columns from an entry. Never fails: anything the
/// entry lacks becomes null.
pub fn flatten(entry: &FeedEntry, kind: EntityKind) -> FlatRecord {
    FlatRecord {
        kind,
        values: kind
            .columns()
            .iter()
            .map(|c| entry.property(c.source).map(str::to_string))
            .collect(),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Ns {
    Atom,
    Data,
    Other,
}

fn classify(resolved: &ResolveResult<'_>) -> Ns {
    match resolved {
        ResolveResult::Bound(Namespace(ns)) if *ns == ATOM_NS => Ns::Atom,
        ResolveResult::Bound(Namespace(ns)) if *ns == DATA_NS => Ns::Data,
        _ => Ns::Other,
    }
}

fn utf8(bytes: &[u8]) -> IngestResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| IngestError::Xml(format!("invalid UTF-8: {e}")))
}

struct OpenProperty {
    name: String,
    text: String,
    depth: usize,
}

/// Parse a feed document into its entries
pub fn parse_feed(xml: &[u8]) -> IngestResult<Vec<FeedEntry>> {
    let mut reader = NsReader::from_reader(xml);
    let mut entries = Vec::new();
    let mut current: Option<FeedEntry> = None;
    let mut property: Option<OpenProperty> = None;
    let mut entry_depth = 0;
    let mut depth = 0;

    loop {
        let (resolved, event) = reader.read_resolved_event()?;
        let ns = classify(&resolved);

        match event {
            Event::Start(e) => {
                depth += 1;
                let name = utf8(e.local_name().as_ref())?;
                if current.is_none() {
                    if ns == Ns::Atom && name == "entry" {
                        current = Some(FeedEntry::default());
                        entry_depth = depth;
                    }
                } else if ns == Ns::Data && property.is_none() {
                    property = Some(OpenProperty {
                        name,
                        text: String::new(),
                        depth,
                    });
                }
            },
            Event::Empty(e) => {
                if let Some(entry) = current.as_mut() {
                    if ns == Ns::Data && property.is_none() {
                        entry.push(utf8(e.local_name().as_ref())?, None);
                    }
                }
            },
            Event::Text(t) => {
                if let Some(open) = property.as_mut() {
                    let text = t.unescape().map_err(|e| IngestError::Xml(e.to_string()))?;
                    open.text.push_str(&text);
                }
            },
            Event::CData(c) => {
                if let Some(open) = property.as_mut() {
                    open.text.push_str(&utf8(&c.into_inner())?);
                }
            },
            Event::End(_) => {
                if property.as_ref().is_some_and(|p| p.depth == depth) {
                    if let (Some(open), Some(entry)) = (property.take(), current.as_mut()) {
                        let value = (!open.text.is_empty()).then_some(open.text);
                        entry.push(open.name, value);
                    }
                } else if depth == entry_depth {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                depth = depth.saturating_sub(1);
            },
            Event::Eof => break,
            _ => {},
        }
    }

    if depth != 0 {
        return Err(IngestError::Xml(format!(
            "document ended with {depth} unclosed element(s)"
        )));
    }

    Ok(entries)
}

/// Parse a feed and flatten every entry for `kind`
pub fn parse_records(xml: &[u8], kind: EntityKind) -> IngestResult<Vec<FlatRecord>> {
    Ok(parse_feed(xml)?.iter().map(|e| flatten(e, kind)).collect())
}
