//! Minimal element tree over the quick-xml event reader
//!
//! Repository exports and package files are navigated by element and
//! attribute names only, so a small owned tree is all the readers need.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    /// Qualified name as written (`DTS:Executable`)
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    /// Concatenated text and CDATA content
    pub text: String,
}

/// XML read errors
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("XML syntax error at byte {position}: {message}")]
    Syntax { position: u64, message: String },

    #[error("document has no root element")]
    Empty,

    #[error("element <{0}> is never closed")]
    Unclosed(String),
}

fn local(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

impl XmlElement {
    /// Name without namespace prefix
    pub fn local_name(&self) -> &str {
        local(&self.name)
    }

    pub fn is(&self, local_name: &str) -> bool {
        self.local_name().eq_ignore_ascii_case(local_name)
    }

    /// Attribute by qualified name, falling back to its local part
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .or_else(|| {
                let wanted = local(name);
                self.attributes
                    .iter()
                    .find(|(k, _)| local(k).eq_ignore_ascii_case(wanted))
            })
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value, ignoring empty strings
    pub fn attr_nonempty(&self, name: &str) -> Option<&str> {
        self.attr(name).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn children_named<'a>(&'a self, local_name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.is(local_name))
    }

    pub fn child(&self, local_name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.is(local_name))
    }

    /// All elements below this one, depth-first, excluding self
    pub fn descendants(&self) -> Vec<&XmlElement> {
        let mut out = Vec::new();
        let mut stack: Vec<&XmlElement> = self.children.iter().rev().collect();
        while let Some(el) = stack.pop() {
            out.push(el);
            stack.extend(el.children.iter().rev());
        }
        out
    }

    /// Descendants with the given local name
    pub fn find_all(&self, local_name: &str) -> Vec<&XmlElement> {
        self.descendants()
            .into_iter()
            .filter(|el| el.is(local_name))
            .collect()
    }

    pub fn text_trimmed(&self) -> &str {
        self.text.trim()
    }
}

fn start_element(start: &BytesStart<'_>) -> XmlElement {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let attributes = start
        .attributes()
        .with_checks(false)
        .filter_map(Result::ok)
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            (key, value)
        })
        .collect();

    XmlElement {
        name,
        attributes,
        ..Default::default()
    }
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

/// Parse a whole document into its root element
pub fn parse_document(xml: &str) -> Result<XmlElement, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader.read_event().map_err(|e| XmlError::Syntax {
            position: reader.buffer_position() as u64,
            message: e.to_string(),
        })?;

        match event {
            Event::Start(start) => stack.push(start_element(&start)),
            Event::Empty(start) => {
                let element = start_element(&start);
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    let value = text
                        .unescape()
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&text).into_owned());
                    top.text.push_str(&value);
                }
            }
            Event::CData(cdata) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&cdata.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        return Err(XmlError::Unclosed(open.name));
    }

    root.ok_or(XmlError::Empty)
}
