//! Minimal XML element tree for SOAP responses.
//!
//! Responses are small, so they are read fully into a tree of [`Node`]s with
//! namespace prefixes stripped from element names. Attribute keys keep their
//! prefix (`xsi:type` and `type` both occur on the same element).

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};

/// An XML element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// Local element name.
    pub name: String,
    /// Attributes as `(qualified key, unescaped value)`.
    pub attrs: Vec<(String, String)>,
    /// Concatenated, unescaped text content.
    pub text: String,
    /// Child elements in document order.
    pub children: Vec<Node>,
}

impl Node {
    /// Parse a document and return its root element.
    pub fn parse(xml: &str) -> Result<Node> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        // The bottom of the stack collects the document element.
        let mut stack = vec![Node::default()];
        loop {
            match reader.read_event()? {
                Event::Start(e) => stack.push(Node::open(&e)?),
                Event::Empty(e) => {
                    let node = Node::open(&e)?;
                    current(&mut stack)?.children.push(node);
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| Error::soap("unbalanced XML end tag"))?;
                    current(&mut stack)?.children.push(node);
                }
                Event::Text(t) => {
                    let text = t.unescape()?;
                    current(&mut stack)?.text.push_str(&text);
                }
                Event::CData(c) => {
                    let raw = c.into_inner();
                    current(&mut stack)?
                        .text
                        .push_str(&String::from_utf8_lossy(&raw));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if stack.len() != 1 {
            return Err(Error::soap("unexpected end of XML document"));
        }
        stack
            .pop()
            .and_then(|doc| doc.children.into_iter().next())
            .ok_or_else(|| Error::soap("empty XML document"))
    }

    fn open(start: &BytesStart<'_>) -> Result<Node> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| Error::soap(format!("invalid XML attribute: {e}")))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attrs.push((key, value));
        }
        Ok(Node {
            name,
            attrs,
            ..Node::default()
        })
    }

    /// First child element named `name`.
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All child elements named `name`.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follow a path of child names.
    pub fn path(&self, names: &[&str]) -> Option<&Node> {
        names.iter().try_fold(self, |node, name| node.child(name))
    }

    /// Text of the first child named `name`.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// Value of the attribute with qualified key `key`.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Depth-first search for the first descendant named `name`.
    pub fn find(&self, name: &str) -> Option<&Node> {
        self.children
            .iter()
            .find_map(|c| if c.name == name { Some(c) } else { c.find(name) })
    }

    /// Remove and return the first child named `name`.
    pub fn take_child(&mut self, name: &str) -> Option<Node> {
        let idx = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(idx))
    }
}

fn current(stack: &mut [Node]) -> Result<&mut Node> {
    stack
        .last_mut()
        .ok_or_else(|| Error::soap("unbalanced XML document"))
}
