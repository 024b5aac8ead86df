//! Order-preserving XML element tree
//!
//! Elements live in an arena owned by [`SchemaTree`] and refer to each other by
//! [`ElementId`]. A child list keeps document order, which the forecast
//! extractor relies on because periods and values are matched by position.

use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;
use tracing::debug;

use crate::error::ForecastError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("xml: {0}")]
    Xml(String),
    #[error("document has no root element")]
    NoRoot,
    #[error("unbalanced markup: {0}")]
    Unbalanced(String),
    #[error("unknown entity reference '&{0};'")]
    UnknownEntity(String),
}

impl From<quick_xml::Error> for SchemaError {
    fn from(err: quick_xml::Error) -> Self {
        SchemaError::Xml(err.to_string())
    }
}

impl From<SchemaError> for ForecastError {
    fn from(err: SchemaError) -> Self {
        ForecastError::malformed(err.to_string())
    }
}

fn xml_error<E: Into<quick_xml::Error>>(err: E) -> SchemaError {
    SchemaError::from(err.into())
}

/// Index of an element inside its [`SchemaTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(usize);

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaAttribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct SchemaElement {
    pub name: String,
    /// Character data directly inside this element, trimmed
    pub value: String,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    attributes: Vec<SchemaAttribute>,
}

/// A parsed XML document
#[derive(Debug, Clone)]
pub struct SchemaTree {
    elements: Vec<SchemaElement>,
}

impl SchemaTree {
    /// Build a tree from raw XML bytes.
    ///
    /// Truncated, unbalanced or otherwise malformed markup is an error; a
    /// partial tree is never returned.
    pub fn parse(bytes: &[u8]) -> Result<Self, SchemaError> {
        let mut reader = Reader::from_reader(bytes);
        let mut builder = TreeBuilder::default();

        loop {
            let event = reader.read_event().map_err(|e| {
                SchemaError::Xml(format!("at byte {}: {e}", reader.error_position()))
            })?;
            match event {
                Event::Start(start) => {
                    builder.open(&reader, &start)?;
                }
                Event::Empty(start) => {
                    builder.open(&reader, &start)?;
                    builder.close()?;
                }
                Event::End(_) => builder.close()?,
                Event::Text(text) => {
                    let content = text.xml_content().map_err(xml_error)?;
                    builder.append_text(&content)?;
                }
                Event::CData(cdata) => {
                    let content = cdata.decode().map_err(xml_error)?;
                    builder.append_text(&content)?;
                }
                Event::GeneralRef(reference) => {
                    if let Some(ch) = reference.resolve_char_ref()? {
                        builder.append_text(ch.encode_utf8(&mut [0; 4]))?;
                    } else {
                        let name = reference.decode().map_err(xml_error)?;
                        let resolved = resolve_predefined_entity(&name)
                            .ok_or_else(|| SchemaError::UnknownEntity(name.to_string()))?;
                        builder.append_text(resolved)?;
                    }
                }
                Event::Eof => break,
                // Declarations, comments, processing instructions and doctypes carry no data
                _ => {}
            }
        }

        let tree = builder.finish()?;
        debug!("Parsed XML tree with {} elements", tree.len());
        Ok(tree)
    }

    #[must_use]
    pub fn root(&self) -> Element<'_> {
        Element {
            tree: self,
            id: ElementId(0),
        }
    }

    /// Number of elements in the document
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    fn node(&self, id: ElementId) -> &SchemaElement {
        &self.elements[id.0]
    }
}

#[derive(Default)]
struct TreeBuilder {
    elements: Vec<SchemaElement>,
    stack: Vec<ElementId>,
}

impl TreeBuilder {
    fn open(&mut self, reader: &Reader<&[u8]>, start: &BytesStart<'_>) -> Result<(), SchemaError> {
        let decoder = reader.decoder();
        let parent = self.stack.last().copied();
        if parent.is_none() && !self.elements.is_empty() {
            return Err(SchemaError::Unbalanced(
                "document has more than one root element".to_string(),
            ));
        }

        let qname = start.name();
        let name = decoder.decode(qname.as_ref()).map_err(xml_error)?;
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(xml_error)?;
            let key = decoder.decode(attribute.key.as_ref()).map_err(xml_error)?;
            let value = attribute.decode_and_unescape_value(decoder)?;
            attributes.push(SchemaAttribute {
                name: key.into_owned(),
                value: value.into_owned(),
            });
        }

        let id = ElementId(self.elements.len());
        self.elements.push(SchemaElement {
            name: name.into_owned(),
            value: String::new(),
            parent,
            children: Vec::new(),
            attributes,
        });
        if let Some(parent) = parent {
            self.elements[parent.0].children.push(id);
        }
        self.stack.push(id);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SchemaError> {
        let id = self
            .stack
            .pop()
            .ok_or_else(|| SchemaError::Unbalanced("end tag without start tag".to_string()))?;
        let element = &mut self.elements[id.0];
        let trimmed = element.value.trim();
        if trimmed.len() != element.value.len() {
            element.value = trimmed.to_string();
        }
        Ok(())
    }

    fn append_text(&mut self, text: &str) -> Result<(), SchemaError> {
        match self.stack.last() {
            Some(id) => {
                self.elements[id.0].value.push_str(text);
                Ok(())
            }
            None if text.trim().is_empty() => Ok(()),
            None => Err(SchemaError::Unbalanced(
                "character data outside the root element".to_string(),
            )),
        }
    }

    fn finish(self) -> Result<SchemaTree, SchemaError> {
        if let Some(open) = self.stack.last() {
            return Err(SchemaError::Unbalanced(format!(
                "element <{}> is never closed",
                self.elements[open.0].name
            )));
        }
        if self.elements.is_empty() {
            return Err(SchemaError::NoRoot);
        }
        Ok(SchemaTree {
            elements: self.elements,
        })
    }
}

/// Borrowed handle to one element of a [`SchemaTree`]
#[derive(Debug, Clone, Copy)]
pub struct Element<'a> {
    tree: &'a SchemaTree,
    id: ElementId,
}

impl<'a> Element<'a> {
    #[must_use]
    pub fn id(self) -> ElementId {
        self.id
    }

    #[must_use]
    pub fn name(self) -> &'a str {
        &self.tree.node(self.id).name
    }

    #[must_use]
    pub fn value(self) -> &'a str {
        &self.tree.node(self.id).value
    }

    #[must_use]
    pub fn parent(self) -> Option<Element<'a>> {
        self.tree
            .node(self.id)
            .parent
            .map(|id| Element { tree: self.tree, id })
    }

    /// Direct children in document order
    pub fn children(self) -> impl Iterator<Item = Element<'a>> {
        let tree = self.tree;
        tree.node(self.id)
            .children
            .iter()
            .map(move |&id| Element { tree, id })
    }

    /// Direct children with the given name, in document order
    pub fn children_named<'n>(self, name: &'n str) -> impl Iterator<Item = Element<'a>> + 'n
    where
        'a: 'n,
    {
        self.children().filter(move |child| child.name() == name)
    }

    /// First direct child with the given name
    #[must_use]
    pub fn child_with_name(self, name: &str) -> Option<Element<'a>> {
        self.children().find(|child| child.name() == name)
    }

    /// First direct child with the given name carrying `attribute_name="attribute_value"`
    #[must_use]
    pub fn child_with_attribute(
        self,
        name: &str,
        attribute_name: &str,
        attribute_value: &str,
    ) -> Option<Element<'a>> {
        self.children().find(|child| {
            child.name() == name && child.attribute_value(attribute_name) == Some(attribute_value)
        })
    }

    #[must_use]
    pub fn attribute_with_name(self, name: &str) -> Option<&'a SchemaAttribute> {
        self.tree
            .node(self.id)
            .attributes
            .iter()
            .find(|attribute| attribute.name == name)
    }

    #[must_use]
    pub fn attribute_value(self, name: &str) -> Option<&'a str> {
        self.attribute_with_name(name)
            .map(|attribute| attribute.value.as_str())
    }

    #[must_use]
    pub fn attributes(self) -> &'a [SchemaAttribute] {
        &self.tree.node(self.id).attributes
    }

    #[must_use]
    pub fn count_of_children(self) -> usize {
        self.tree.node(self.id).children.len()
    }

    #[must_use]
    pub fn count_of_attributes(self) -> usize {
        self.tree.node(self.id).attributes.len()
    }

    /// Follow a path of first-match child names, e.g. `["data", "location", "point"]`
    #[must_use]
    pub fn descendant(self, path: &[&str]) -> Option<Element<'a>> {
        path.iter()
            .try_fold(self, |element, name| element.child_with_name(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<!-- sample -->
<dwml version="1.0">
  <data>
    <location><location-key>point1</location-key><point latitude="38.99" longitude="-77.01"/></location>
    <parameters applicable-location="point2"><name>second</name></parameters>
    <parameters applicable-location="point1"><name>  first &amp; best  </name></parameters>
    <note><![CDATA[raw <text>]]> and &#65;</note>
  </data>
</dwml>"#;

    #[test]
    fn test_parse_builds_ordered_tree() {
        let tree = SchemaTree::parse(SAMPLE.as_bytes()).unwrap();
        let root = tree.root();
        assert_eq!(root.name(), "dwml");
        assert_eq!(root.attribute_value("version"), Some("1.0"));
        assert!(root.parent().is_none());

        let data = root.child_with_name("data").unwrap();
        let names: Vec<&str> = data.children().map(Element::name).collect();
        assert_eq!(names, vec!["location", "parameters", "parameters", "note"]);
        assert_eq!(data.count_of_children(), 4);
        assert_eq!(data.parent().unwrap().id(), root.id());
    }

    #[test]
    fn test_child_with_attribute_resolves_cross_reference() {
        let tree = SchemaTree::parse(SAMPLE.as_bytes()).unwrap();
        let data = tree.root().child_with_name("data").unwrap();

        let parameters = data
            .child_with_attribute("parameters", "applicable-location", "point1")
            .unwrap();
        assert_eq!(parameters.child_with_name("name").unwrap().value(), "first & best");
        assert!(
            data.child_with_attribute("parameters", "applicable-location", "point9")
                .is_none()
        );
    }

    #[test]
    fn test_attributes_and_descendant_path() {
        let tree = SchemaTree::parse(SAMPLE.as_bytes()).unwrap();
        let point = tree.root().descendant(&["data", "location", "point"]).unwrap();
        assert_eq!(point.count_of_attributes(), 2);
        assert_eq!(point.count_of_children(), 0);
        assert_eq!(point.attribute_with_name("latitude").unwrap().value, "38.99");
        assert!(point.attribute_with_name("elevation").is_none());
        assert_eq!(
            point.parent().unwrap().child_with_name("location-key").unwrap().value(),
            "point1"
        );
    }

    #[test]
    fn test_cdata_and_character_references() {
        let tree = SchemaTree::parse(SAMPLE.as_bytes()).unwrap();
        let note = tree.root().descendant(&["data", "note"]).unwrap();
        assert_eq!(note.value(), "raw <text> and A");
    }

    #[test]
    fn test_attribute_entities_are_unescaped() {
        let tree = SchemaTree::parse(br#"<a title="x &lt; y"/>"#).unwrap();
        assert_eq!(tree.root().attribute_value("title"), Some("x < y"));
        assert_eq!(tree.len(), 1);
    }

    #[rstest]
    #[case::truncated("<dwml><data><location>")]
    #[case::mismatched("<dwml><data></location></dwml>")]
    #[case::stray_end("<dwml></dwml></data>")]
    #[case::two_roots("<a/><b/>")]
    #[case::empty("")]
    #[case::only_declaration("<?xml version=\"1.0\"?>")]
    #[case::text_outside_root("hello <a/>")]
    #[case::unknown_entity("<a>&nbsp;</a>")]
    #[case::cut_in_tag("<dwml><data lat=\"3")]
    fn test_malformed_documents_fail(#[case] xml: &str) {
        assert!(SchemaTree::parse(xml.as_bytes()).is_err());
    }

    #[test]
    fn test_schema_error_maps_to_malformed_response() {
        let err: ForecastError = SchemaTree::parse(b"<a>").unwrap_err().into();
        assert!(matches!(err, ForecastError::MalformedResponse { .. }));
    }
}
