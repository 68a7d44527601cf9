use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::property::{PropertyDecl, PropertyMap, PropertyType, PropertyValue};
use crate::registry::InstanceHandle;
use crate::template::{Template, TemplateError};

const RESERVED_NAMES: &[&str] = &[
    "annotation-xml",
    "color-profile",
    "font-face",
    "font-face-src",
    "font-face-uri",
    "font-face-format",
    "font-face-name",
    "missing-glyph",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("invalid custom element name {0:?}")]
    InvalidTagName(String),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("template for <{tag}> references undeclared property {name:?}")]
    UnknownBinding { tag: String, name: String },
    #[error("default for {name:?} is a {found}, declared {expected}")]
    DefaultTypeMismatch {
        name: String,
        expected: PropertyType,
        found: PropertyType,
    },
    #[error("attribute {attribute:?} is mapped by more than one property")]
    DuplicateAttribute { attribute: String },
    #[error("property {0:?} is declared more than once")]
    DuplicateProperty(String),
}

/// Callbacks fired by the registry around an instance's life. Hooks only see
/// values, so they can't re-enter the registry mid-update.
pub trait LifecycleHooks {
    /// After the first render.
    fn created(&self, _instance: InstanceHandle, _properties: &PropertyMap) {}

    /// After a changed value has been rendered and reflected.
    fn property_changed(
        &self,
        _instance: InstanceHandle,
        _name: &str,
        _old: &PropertyValue,
        _new: &PropertyValue,
    ) {
    }

    /// Before the host node is dropped.
    fn disposed(&self, _instance: InstanceHandle) {}
}

pub fn is_valid_custom_element_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() || !name.contains('-') {
        return false;
    }
    let allowed = |ch: char| {
        matches!(ch, '-' | '.' | '_') || ch.is_ascii_digit() || ch.is_ascii_lowercase() || !ch.is_ascii()
    };
    chars.all(allowed) && !RESERVED_NAMES.contains(&name)
}

pub struct ComponentDefinition {
    tag_name: String,
    template: Template,
    properties: BTreeMap<String, PropertyDecl>,
    attributes: HashMap<String, String>,
    hooks: Option<Rc<dyn LifecycleHooks>>,
}

impl fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("tag_name", &self.tag_name)
            .field("template", &self.template)
            .field("properties", &self.properties)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

impl ComponentDefinition {
    pub fn builder(tag_name: impl Into<String>) -> DefinitionBuilder {
        DefinitionBuilder {
            tag_name: tag_name.into(),
            template: TemplateSource::Parsed(Template::empty()),
            properties: Vec::new(),
            hooks: None,
        }
    }

    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDecl> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyDecl> {
        self.properties.values()
    }

    pub fn property_for_attribute(&self, attribute: &str) -> Option<&PropertyDecl> {
        self.attributes
            .get(attribute)
            .and_then(|name| self.properties.get(name))
    }

    pub fn hooks(&self) -> Option<&Rc<dyn LifecycleHooks>> {
        self.hooks.as_ref()
    }

    pub fn defaults(&self) -> PropertyMap {
        self.properties
            .values()
            .map(|decl| (decl.name().to_string(), decl.default_value().clone()))
            .collect()
    }
}

enum TemplateSource {
    Parsed(Template),
    Markup(String),
}

pub struct DefinitionBuilder {
    tag_name: String,
    template: TemplateSource,
    properties: Vec<PropertyDecl>,
    hooks: Option<Rc<dyn LifecycleHooks>>,
}

impl DefinitionBuilder {
    pub fn template(mut self, template: Template) -> Self {
        self.template = TemplateSource::Parsed(template);
        self
    }

    /// Markup is parsed when the definition is built.
    pub fn markup(mut self, markup: impl Into<String>) -> Self {
        self.template = TemplateSource::Markup(markup.into());
        self
    }

    pub fn property(mut self, decl: PropertyDecl) -> Self {
        self.properties.push(decl);
        self
    }

    pub fn hooks(mut self, hooks: Rc<dyn LifecycleHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn build(self) -> Result<ComponentDefinition, DefinitionError> {
        if !is_valid_custom_element_name(&self.tag_name) {
            return Err(DefinitionError::InvalidTagName(self.tag_name));
        }

        let template = match self.template {
            TemplateSource::Parsed(template) => template,
            TemplateSource::Markup(markup) => Template::parse(&markup)?,
        };

        let mut properties = BTreeMap::new();
        let mut attributes = HashMap::new();
        for decl in self.properties {
            if !decl.accepts(decl.default_value()) {
                return Err(DefinitionError::DefaultTypeMismatch {
                    name: decl.name().to_string(),
                    expected: decl.ty(),
                    found: decl.default_value().kind(),
                });
            }
            if properties.contains_key(decl.name()) {
                return Err(DefinitionError::DuplicateProperty(decl.name().to_string()));
            }
            if attributes
                .insert(decl.attribute_name().to_string(), decl.name().to_string())
                .is_some()
            {
                return Err(DefinitionError::DuplicateAttribute {
                    attribute: decl.attribute_name().to_string(),
                });
            }
            properties.insert(decl.name().to_string(), decl);
        }

        if let Some(name) = template
            .dependencies()
            .into_iter()
            .find(|name| !properties.contains_key(name))
        {
            return Err(DefinitionError::UnknownBinding {
                tag: self.tag_name,
                name,
            });
        }

        Ok(ComponentDefinition {
            tag_name: self.tag_name,
            template,
            properties,
            attributes,
            hooks: self.hooks,
        })
    }
}
