//! Minimal XML element tree with a quick-xml reader and writer.
//!
//! Elements carry ordered attributes and either child elements or text.
//! Mixed content is not supported. Text of a leaf element is kept verbatim;
//! whitespace between child elements is indentation and is dropped.

use crate::error::{Result, StoreError};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: Option<String>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Adds the attribute only when a value is present.
    pub fn with_opt_attr(self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.with_attr(name, value),
            None => self,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Sets an attribute, keeping its position if it already exists.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let idx = self.attributes.iter().position(|(key, _)| key == name)?;
        Some(self.attributes.remove(idx).1)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of the named child; an empty child yields `Some("")`.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_deref().unwrap_or(""))
    }

    /// Parse a complete document and return its root element.
    pub fn parse(xml: &str) -> Result<Element> {
        let mut reader = Reader::from_str(xml);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    if root.is_some() {
                        return Err(StoreError::Syntax(
                            "content after the root element".to_string(),
                        ));
                    }
                    stack.push(element_from_start(&start)?);
                }
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let text = text.unescape()?;
                    push_text(&mut stack, &text)?;
                }
                Event::CData(data) => {
                    let text = String::from_utf8(data.into_inner().into_owned())
                        .map_err(|e| StoreError::Syntax(format!("invalid UTF-8 in CDATA: {}", e)))?;
                    push_text(&mut stack, &text)?;
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| {
                        StoreError::Syntax("closing tag without opening tag".to_string())
                    })?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(StoreError::Syntax(format!("unclosed element <{}>", open.name)));
        }
        root.ok_or_else(|| StoreError::Syntax("document has no root element".to_string()))
    }

    /// Serialize as an indented document with an XML declaration.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        write_element(&mut writer, self)?;

        let mut xml = String::from_utf8(writer.into_inner().into_inner())
            .map_err(|e| StoreError::Syntax(format!("writer produced invalid UTF-8: {}", e)))?;
        xml.push('\n');
        Ok(xml)
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element> {
    let name = utf8(start.name().as_ref())?;
    let mut element = Element::new(name);

    for attr in start.attributes() {
        let attr = attr.map_err(|e| StoreError::Syntax(e.to_string()))?;
        let key = utf8(attr.key.as_ref())?;
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }

    Ok(element)
}

fn utf8(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| StoreError::Syntax(format!("invalid UTF-8 in name: {}", e)))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            if let Some(text) = parent.text.take() {
                if !text.trim().is_empty() {
                    return Err(mixed_content(parent));
                }
            }
            parent.children.push(element);
        }
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(StoreError::Syntax(
                "document has more than one root element".to_string(),
            ))
        }
    }
    Ok(())
}

fn push_text(stack: &mut [Element], text: &str) -> Result<()> {
    let blank = text.trim().is_empty();
    let Some(parent) = stack.last_mut() else {
        if blank {
            return Ok(());
        }
        return Err(StoreError::Syntax("text outside the root element".to_string()));
    };
    if !parent.children.is_empty() {
        if blank {
            return Ok(());
        }
        return Err(mixed_content(parent));
    }
    parent.text.get_or_insert_with(String::new).push_str(text);
    Ok(())
}

fn mixed_content(parent: &Element) -> StoreError {
    StoreError::Syntax(format!(
        "mixed content in <{}> is not supported",
        parent.name
    ))
}

fn write_element(writer: &mut Writer<Cursor<Vec<u8>>>, element: &Element) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    let text = element.text.as_deref().filter(|t| !t.is_empty());
    if element.children.is_empty() && text.is_none() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    if let Some(text) = text {
        writer.write_event(Event::Text(BytesText::new(text)))?;
    }
    for child in &element.children {
        write_element(writer, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}
