//! The form-definition tree and its compiled form.
//!
//! A [`FormNode`] tree is the parsed representation of a form definition:
//! tag name, attribute map, ordered children. The tree is immutable once
//! loaded and shared across renders. Markup parsing happens upstream; the
//! YAML shape here is the interchange form the engine accepts.
//!
//! [`CompiledForm`] resolves every node against a [`TagRegistry`] exactly
//! once at load time. Rendering then dispatches on the resolved handler,
//! never on tag-name strings; unrecognized tags become literal markup
//! nodes, emitted without interpretation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::DesignError;
use crate::registry::{HandlerId, TagRegistry};

/// One node of the parsed definition: markup text or an element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormNode {
    Text(String),
    Element(ElementNode),
}

/// A named, attributed element with ordered children.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementNode {
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<FormNode>,
}

impl ElementNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: FormNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// A required attribute; missing or blank is a form-design error.
    pub fn required_attribute(&self, name: &str) -> Result<&str, DesignError> {
        match self.attribute(name).map(str::trim).filter(|v| !v.is_empty()) {
            Some(value) => Ok(value),
            None => Err(DesignError::MissingAttribute {
                tag: self.tag.clone(),
                attribute: name.to_owned(),
            }),
        }
    }

    /// Whether an attribute is literally `"true"`.
    pub fn flag(&self, name: &str) -> bool {
        self.attribute(name).map(str::trim) == Some("true")
    }
}

/// Read a form-definition tree from YAML.
pub fn read_form_yaml(yaml: &str) -> Result<FormNode, DesignError> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// A definition tree with tag dispatch resolved once.
#[derive(Debug)]
pub struct CompiledForm {
    pub(crate) root: CompiledNode,
}

#[derive(Debug)]
pub(crate) enum CompiledNode {
    Text(String),
    /// No handler registered for the tag: emit the markup literally.
    Literal {
        element: ElementNode,
        children: Vec<CompiledNode>,
    },
    Tag {
        handler: HandlerId,
        element: ElementNode,
        children: Vec<CompiledNode>,
    },
}

impl CompiledForm {
    /// Resolves the whole tree against the registry.
    pub fn compile(root: &FormNode, registry: &TagRegistry) -> Self {
        Self {
            root: compile_node(root, registry),
        }
    }
}

fn compile_node(node: &FormNode, registry: &TagRegistry) -> CompiledNode {
    match node {
        FormNode::Text(text) => CompiledNode::Text(text.clone()),
        FormNode::Element(element) => {
            let children = element
                .children
                .iter()
                .map(|child| compile_node(child, registry))
                .collect();
            match registry.resolve(&element.tag) {
                Some(handler) => CompiledNode::Tag {
                    handler,
                    element: element.clone(),
                    children,
                },
                None => CompiledNode::Literal {
                    element: element.clone(),
                    children,
                },
            }
        }
    }
}
