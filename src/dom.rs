use std::collections::HashMap;

use html_escape::{encode_double_quoted_attribute, encode_text};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type NodeId = usize;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

// text children of these are emitted without escaping
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "iframe", "noembed", "noframes", "plaintext", "script", "style", "xmp",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("missing node {0}")]
    MissingNode(NodeId),
    #[error("node {0} is not an element")]
    NotAnElement(NodeId),
    #[error("node {0} is not a text node")]
    NotAText(NodeId),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomPatch {
    CreateElement {
        node: NodeId,
        tag_name: String,
    },
    CreateTextNode {
        node: NodeId,
        data: String,
    },
    TextContent {
        node: NodeId,
        value: String,
    },
    Attribute {
        node: NodeId,
        name: String,
        value: String,
    },
    RemoveAttribute {
        node: NodeId,
        name: String,
    },
    AppendChild {
        parent: NodeId,
        child: NodeId,
    },
    RemoveNode {
        node: NodeId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    pub tag_name: String,
    pub attributes: Vec<(String, String)>,
}

impl ElementData {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Document,
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub data: NodeData,
}

/// Arena-backed node tree that component output renders into. Every change
/// is recorded as a [`DomPatch`] until drained.
pub struct DomTree {
    nodes: HashMap<NodeId, Node>,
    next_id: NodeId,
    mutations: Vec<DomPatch>,
}

impl Default for DomTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DomTree {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            0,
            Node {
                id: 0,
                parent: None,
                children: Vec::new(),
                data: NodeData::Document,
            },
        );
        Self {
            nodes,
            // ids are never reused, so a stale id can't alias a newer node
            next_id: 1,
            mutations: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Number of live nodes, the document node included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    fn node_mut(&mut self, node_id: NodeId) -> Result<&mut Node, DomError> {
        self.nodes
            .get_mut(&node_id)
            .ok_or(DomError::MissingNode(node_id))
    }

    fn element_mut(&mut self, node_id: NodeId) -> Result<&mut ElementData, DomError> {
        match &mut self.node_mut(node_id)?.data {
            NodeData::Element(element) => Ok(element),
            _ => Err(DomError::NotAnElement(node_id)),
        }
    }

    fn allocate(&mut self, data: NodeData) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                id,
                parent: None,
                children: Vec::new(),
                data,
            },
        );
        id
    }

    pub fn create_element(&mut self, tag_name: &str) -> NodeId {
        let node = self.allocate(NodeData::Element(ElementData {
            tag_name: tag_name.to_string(),
            attributes: Vec::new(),
        }));
        self.mutations.push(DomPatch::CreateElement {
            node,
            tag_name: tag_name.to_string(),
        });
        node
    }

    pub fn create_text_node(&mut self, data: &str) -> NodeId {
        let node = self.allocate(NodeData::Text(data.to_string()));
        self.mutations.push(DomPatch::CreateTextNode {
            node,
            data: data.to_string(),
        });
        node
    }

    /// Appends `child` under `parent`, detaching it from any previous parent.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        if !self.contains(parent) {
            return Err(DomError::MissingNode(parent));
        }
        let previous = self.node_mut(child)?.parent.replace(parent);
        if let Some(previous) = previous {
            self.node_mut(previous)?.children.retain(|id| *id != child);
        }
        self.node_mut(parent)?.children.push(child);
        self.mutations.push(DomPatch::AppendChild { parent, child });
        Ok(())
    }

    /// Returns whether the attribute changed.
    pub fn set_attribute(
        &mut self,
        node_id: NodeId,
        name: &str,
        value: &str,
    ) -> Result<bool, DomError> {
        let element = self.element_mut(node_id)?;
        match element
            .attributes
            .iter_mut()
            .find(|(existing, _)| existing == name)
        {
            Some((_, current)) if current == value => return Ok(false),
            Some((_, current)) => *current = value.to_string(),
            None => element
                .attributes
                .push((name.to_string(), value.to_string())),
        }
        self.mutations.push(DomPatch::Attribute {
            node: node_id,
            name: name.to_string(),
            value: value.to_string(),
        });
        Ok(true)
    }

    /// Returns whether an attribute was present.
    pub fn remove_attribute(&mut self, node_id: NodeId, name: &str) -> Result<bool, DomError> {
        let element = self.element_mut(node_id)?;
        let before = element.attributes.len();
        element.attributes.retain(|(existing, _)| existing != name);
        if element.attributes.len() == before {
            return Ok(false);
        }
        self.mutations.push(DomPatch::RemoveAttribute {
            node: node_id,
            name: name.to_string(),
        });
        Ok(true)
    }

    pub fn get_attribute(&self, node_id: NodeId, name: &str) -> Option<&str> {
        match &self.get_node(node_id)?.data {
            NodeData::Element(element) => element.attr(name),
            _ => None,
        }
    }

    pub fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        match &self.get_node(node_id)?.data {
            NodeData::Element(element) => Some(element.tag_name.as_str()),
            _ => None,
        }
    }

    /// Replaces the data of a text node. Returns whether it changed.
    pub fn set_text(&mut self, node_id: NodeId, value: &str) -> Result<bool, DomError> {
        let node = self.node_mut(node_id)?;
        let NodeData::Text(current) = &mut node.data else {
            return Err(DomError::NotAText(node_id));
        };
        if current == value {
            return Ok(false);
        }
        *current = value.to_string();
        self.mutations.push(DomPatch::TextContent {
            node: node_id,
            value: value.to_string(),
        });
        Ok(true)
    }

    pub fn text_content(&self, node_id: NodeId) -> String {
        let mut output = String::new();
        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            let Some(node) = self.get_node(id) else {
                continue;
            };
            if let NodeData::Text(text) = &node.data {
                output.push_str(text);
            }
            stack.extend(node.children.iter().rev());
        }
        output
    }

    /// Detaches `node_id` and drops it with all descendants. Returns the ids
    /// that were dropped, the subtree root first.
    pub fn remove_subtree(&mut self, node_id: NodeId) -> Result<Vec<NodeId>, DomError> {
        let parent = self
            .get_node(node_id)
            .ok_or(DomError::MissingNode(node_id))?
            .parent;
        if let Some(parent) = parent {
            self.node_mut(parent)?.children.retain(|id| *id != node_id);
        }

        let mut removed = Vec::new();
        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.remove(&id) {
                removed.push(id);
                stack.extend(node.children);
            }
        }

        self.mutations.push(DomPatch::RemoveNode { node: node_id });
        Ok(removed)
    }

    pub fn mutations(&self) -> &[DomPatch] {
        &self.mutations
    }

    pub fn drain_mutations(&mut self) -> Vec<DomPatch> {
        std::mem::take(&mut self.mutations)
    }

    pub fn serialize(&self, node_id: NodeId) -> Result<String, DomError> {
        let mut output = String::new();
        self.serialize_node(node_id, &mut output)?;
        Ok(output)
    }

    pub fn inner_html(&self, node_id: NodeId) -> Result<String, DomError> {
        let mut output = String::new();
        self.serialize_children(node_id, &mut output)?;
        Ok(output)
    }

    fn serialize_children(&self, node_id: NodeId, output: &mut String) -> Result<(), DomError> {
        let node = self
            .get_node(node_id)
            .ok_or(DomError::MissingNode(node_id))?;
        for child in &node.children {
            self.serialize_node(*child, output)?;
        }
        Ok(())
    }

    fn serialize_node(&self, node_id: NodeId, output: &mut String) -> Result<(), DomError> {
        let node = self
            .get_node(node_id)
            .ok_or(DomError::MissingNode(node_id))?;

        match &node.data {
            NodeData::Document => {
                self.serialize_children(node_id, output)?;
            }
            NodeData::Element(element) => {
                output.push('<');
                output.push_str(&element.tag_name);
                for (name, value) in &element.attributes {
                    output.push(' ');
                    output.push_str(name);
                    if !value.is_empty() {
                        output.push_str("=\"");
                        output.push_str(&encode_double_quoted_attribute(value));
                        output.push('"');
                    }
                }
                output.push('>');
                if VOID_ELEMENTS.contains(&element.tag_name.as_str()) {
                    return Ok(());
                }
                self.serialize_children(node_id, output)?;
                output.push_str("</");
                output.push_str(&element.tag_name);
                output.push('>');
            }
            NodeData::Text(text) => {
                let raw = node
                    .parent
                    .and_then(|parent| self.tag_name(parent))
                    .is_some_and(|tag| RAW_TEXT_ELEMENTS.contains(&tag));
                if raw {
                    output.push_str(text);
                } else {
                    output.push_str(&encode_text(text));
                }
            }
        }

        Ok(())
    }
}
