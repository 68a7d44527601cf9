use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::definition::{is_valid_custom_element_name, ComponentDefinition};
use crate::dom::{DomError, DomPatch, DomTree, NodeId};
use crate::property::{ConversionError, PropertyDecl, PropertyMap, PropertyType, PropertyValue};
use crate::template::{Expression, TemplateNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceHandle(u64);

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("<{0}> is already registered")]
    DuplicateTag(String),
    #[error("<{0}> is not registered")]
    UnknownTag(String),
    #[error("<{tag}> has no property {name:?}")]
    UnknownProperty { tag: String, name: String },
    #[error("property {name:?} of <{tag}> expects {expected}, got {found}")]
    TypeMismatch {
        tag: String,
        name: String,
        expected: PropertyType,
        found: String,
    },
    #[error("invalid custom element name {0:?}")]
    InvalidTagName(String),
    #[error("definition for <{definition}> cannot be registered as <{tag}>")]
    TagMismatch { tag: String, definition: String },
    #[error("unknown instance {0}")]
    UnknownInstance(InstanceHandle),
    #[error("dom error: {0}")]
    Dom(#[from] DomError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BindingTarget {
    Text,
    Attribute(String),
}

/// One rendered text node or attribute that depends on property values.
#[derive(Debug, Clone)]
struct Binding {
    node: NodeId,
    target: BindingTarget,
    expression: Expression,
}

struct ComponentInstance {
    definition: Weak<ComponentDefinition>,
    tag_name: String,
    host: NodeId,
    values: PropertyMap,
    bindings: Vec<Binding>,
    // property name -> indices into `bindings`
    dependents: HashMap<String, Vec<usize>>,
    children: Vec<InstanceHandle>,
    parent: Option<InstanceHandle>,
}

type BindingUpdate = (NodeId, BindingTarget, String);

/// A property change that has been evaluated but not yet written.
struct PlannedChange {
    host: NodeId,
    old: PropertyValue,
    values: PropertyMap,
    updates: Vec<BindingUpdate>,
}

#[derive(Default)]
struct RenderOutput {
    bindings: Vec<Binding>,
    children: Vec<InstanceHandle>,
}

/// Owns component definitions, live instances and the tree they render into.
///
/// All operations are synchronous and run to completion. The registry is not
/// `Send`; it belongs to the thread that owns the tree.
pub struct Registry {
    definitions: HashMap<String, Rc<ComponentDefinition>>,
    instances: HashMap<InstanceHandle, ComponentInstance>,
    hosts: HashMap<NodeId, InstanceHandle>,
    document: DomTree,
    next_instance: u64,
    // tags currently rendering, to stop a template from nesting itself
    rendering: Vec<String>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_document(DomTree::new())
    }

    pub fn with_document(document: DomTree) -> Self {
        Self {
            definitions: HashMap::new(),
            instances: HashMap::new(),
            hosts: HashMap::new(),
            document,
            next_instance: 1,
            rendering: Vec::new(),
        }
    }

    pub fn register(
        &mut self,
        tag_name: &str,
        definition: ComponentDefinition,
    ) -> Result<(), RegistryError> {
        if !is_valid_custom_element_name(tag_name) {
            return Err(RegistryError::InvalidTagName(tag_name.to_string()));
        }
        if self.definitions.contains_key(tag_name) {
            return Err(RegistryError::DuplicateTag(tag_name.to_string()));
        }
        if definition.tag_name() != tag_name {
            return Err(RegistryError::TagMismatch {
                tag: tag_name.to_string(),
                definition: definition.tag_name().to_string(),
            });
        }

        debug!(
            target = "components",
            tag = tag_name,
            properties = definition.properties().count(),
            "registered component"
        );
        self.definitions
            .insert(tag_name.to_string(), Rc::new(definition));
        Ok(())
    }

    pub fn is_registered(&self, tag_name: &str) -> bool {
        self.definitions.contains_key(tag_name)
    }

    pub fn definition(&self, tag_name: &str) -> Option<Rc<ComponentDefinition>> {
        self.definitions.get(tag_name).cloned()
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Creates and renders an instance. The host node starts detached; see
    /// [`Registry::mount`].
    pub fn instantiate(
        &mut self,
        tag_name: &str,
        initial: PropertyMap,
    ) -> Result<InstanceHandle, RegistryError> {
        let definition = self
            .definitions
            .get(tag_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTag(tag_name.to_string()))?;

        let mut values = definition.defaults();
        for (name, value) in initial {
            let decl = declared(&definition, &name)?;
            check_type(&definition, decl, &value)?;
            values.insert(name, value);
        }

        self.create_instance(definition, values, None)
    }

    pub fn get_property(
        &self,
        handle: InstanceHandle,
        name: &str,
    ) -> Result<&PropertyValue, RegistryError> {
        let instance = self.instance(handle)?;
        instance
            .values
            .get(name)
            .ok_or_else(|| RegistryError::UnknownProperty {
                tag: instance.tag_name.clone(),
                name: name.to_string(),
            })
    }

    pub fn properties(&self, handle: InstanceHandle) -> Result<&PropertyMap, RegistryError> {
        Ok(&self.instance(handle)?.values)
    }

    /// The only mutation path for an instance: stores the value, reflects it
    /// and re-renders the bindings that read it.
    ///
    /// Nested components fed by those bindings are checked before anything
    /// is written, so a value a child rejects leaves every instance as it was.
    pub fn set_property(
        &mut self,
        handle: InstanceHandle,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), RegistryError> {
        let definition = self.definition_of(handle)?;
        let decl = declared(&definition, name)?;
        check_type(&definition, decl, &value)?;

        let Some(change) = self.plan_change(handle, decl, &value)? else {
            trace!(target = "components", instance = %handle, property = name, "property unchanged");
            return Ok(());
        };
        self.check_nested(&change.updates)?;

        let PlannedChange {
            host,
            old,
            values,
            updates,
        } = change;
        self.instance_mut(handle)?.values = values;

        if decl.reflects() {
            self.reflect(host, decl, &value)?;
        }

        trace!(
            target = "components",
            instance = %handle,
            property = name,
            bindings = updates.len(),
            "property changed"
        );
        for (node, target, text) in updates {
            self.write_binding(node, &target, &text)?;
        }

        if let Some(hooks) = definition.hooks() {
            hooks.property_changed(handle, name, &old, &value);
        }
        Ok(())
    }

    /// Attribute-side entry point, like `attributeChangedCallback`. Attributes
    /// mapped to a property are converted and routed through
    /// [`Registry::set_property`]; others are set on the host as-is. `None`
    /// removes the attribute.
    pub fn set_attribute(
        &mut self,
        handle: InstanceHandle,
        attribute: &str,
        value: Option<&str>,
    ) -> Result<(), RegistryError> {
        let definition = self.definition_of(handle)?;
        let host = self.instance(handle)?.host;

        let Some(decl) = definition.property_for_attribute(attribute) else {
            match value {
                Some(text) => self.document.set_attribute(host, attribute, text)?,
                None => self.document.remove_attribute(host, attribute)?,
            };
            return Ok(());
        };

        let next = attribute_value(decl, value)
            .map_err(|err| conversion_mismatch(&definition, decl, err))?;

        self.set_property(handle, decl.name(), next)?;

        // reflected properties write their own canonical attribute
        if !decl.reflects() {
            match value {
                Some(text) => self.document.set_attribute(host, attribute, text)?,
                None => self.document.remove_attribute(host, attribute)?,
            };
        }
        Ok(())
    }

    pub fn attribute(
        &self,
        handle: InstanceHandle,
        attribute: &str,
    ) -> Result<Option<&str>, RegistryError> {
        let host = self.instance(handle)?.host;
        Ok(self.document.get_attribute(host, attribute))
    }

    pub fn host(&self, handle: InstanceHandle) -> Result<NodeId, RegistryError> {
        Ok(self.instance(handle)?.host)
    }

    pub fn tag_name(&self, handle: InstanceHandle) -> Result<&str, RegistryError> {
        Ok(&self.instance(handle)?.tag_name)
    }

    /// Instances created for registered tags inside this instance's template.
    pub fn children(&self, handle: InstanceHandle) -> Result<&[InstanceHandle], RegistryError> {
        Ok(&self.instance(handle)?.children)
    }

    pub fn instance_for_node(&self, node: NodeId) -> Option<InstanceHandle> {
        self.hosts.get(&node).copied()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn mount(&mut self, handle: InstanceHandle, parent: NodeId) -> Result<(), RegistryError> {
        let host = self.instance(handle)?.host;
        self.document.append_child(parent, host)?;
        Ok(())
    }

    /// Tears down an instance with its nested children and detaches its host
    /// node. The handle is invalid afterwards.
    pub fn dispose(&mut self, handle: InstanceHandle) -> Result<(), RegistryError> {
        let (host, parent) = {
            let instance = self.instance(handle)?;
            (instance.host, instance.parent)
        };

        self.teardown(handle);
        let removed = self.document.remove_subtree(host)?;

        if let Some(parent) = parent.and_then(|parent| self.instances.get_mut(&parent)) {
            parent.children.retain(|child| *child != handle);
            let removed: HashSet<NodeId> = removed.into_iter().collect();
            parent
                .bindings
                .retain(|binding| !removed.contains(&binding.node));
            parent.dependents = index_dependents(&parent.bindings);
        }

        debug!(target = "components", instance = %handle, "disposed component");
        Ok(())
    }

    pub fn render_html(&self, handle: InstanceHandle) -> Result<String, RegistryError> {
        let host = self.instance(handle)?.host;
        Ok(self.document.serialize(host)?)
    }

    pub fn document(&self) -> &DomTree {
        &self.document
    }

    pub fn drain_mutations(&mut self) -> Vec<DomPatch> {
        self.document.drain_mutations()
    }

    fn instance(&self, handle: InstanceHandle) -> Result<&ComponentInstance, RegistryError> {
        self.instances
            .get(&handle)
            .ok_or(RegistryError::UnknownInstance(handle))
    }

    fn instance_mut(
        &mut self,
        handle: InstanceHandle,
    ) -> Result<&mut ComponentInstance, RegistryError> {
        self.instances
            .get_mut(&handle)
            .ok_or(RegistryError::UnknownInstance(handle))
    }

    fn definition_of(
        &self,
        handle: InstanceHandle,
    ) -> Result<Rc<ComponentDefinition>, RegistryError> {
        let instance = self.instance(handle)?;
        instance
            .definition
            .upgrade()
            .ok_or_else(|| RegistryError::UnknownTag(instance.tag_name.clone()))
    }

    fn create_instance(
        &mut self,
        definition: Rc<ComponentDefinition>,
        values: PropertyMap,
        parent: Option<InstanceHandle>,
    ) -> Result<InstanceHandle, RegistryError> {
        self.rendering.push(definition.tag_name().to_string());
        let result = self.build_instance(&definition, values, parent);
        self.rendering.pop();

        let handle = result?;
        if let Some(hooks) = definition.hooks() {
            if let Ok(instance) = self.instance(handle) {
                hooks.created(handle, &instance.values);
            }
        }
        Ok(handle)
    }

    fn build_instance(
        &mut self,
        definition: &Rc<ComponentDefinition>,
        values: PropertyMap,
        parent: Option<InstanceHandle>,
    ) -> Result<InstanceHandle, RegistryError> {
        let handle = InstanceHandle(self.next_instance);
        self.next_instance += 1;

        let host = self.document.create_element(definition.tag_name());
        let mut output = RenderOutput::default();
        let rendered = self.render_host(definition, handle, host, &values, &mut output);

        if let Err(err) = rendered {
            for child in output.children {
                if let Err(cleanup) = self.dispose(child) {
                    warn!(target = "components", instance = %child, error = %cleanup, "failed to dispose child after render error");
                }
            }
            self.document.remove_subtree(host)?;
            return Err(err);
        }

        let dependents = index_dependents(&output.bindings);
        self.hosts.insert(host, handle);
        self.instances.insert(
            handle,
            ComponentInstance {
                definition: Rc::downgrade(definition),
                tag_name: definition.tag_name().to_string(),
                host,
                values,
                bindings: output.bindings,
                dependents,
                children: output.children,
                parent,
            },
        );

        debug!(
            target = "components",
            tag = definition.tag_name(),
            instance = %handle,
            host,
            "instantiated component"
        );
        Ok(handle)
    }

    fn render_host(
        &mut self,
        definition: &ComponentDefinition,
        owner: InstanceHandle,
        host: NodeId,
        values: &PropertyMap,
        output: &mut RenderOutput,
    ) -> Result<(), RegistryError> {
        for decl in definition.properties().filter(|decl| decl.reflects()) {
            if let Some(value) = values.get(decl.name()) {
                self.reflect(host, decl, value)?;
            }
        }
        self.render_nodes(owner, definition.template().roots(), host, values, output)
    }

    fn render_nodes(
        &mut self,
        owner: InstanceHandle,
        nodes: &[TemplateNode],
        parent: NodeId,
        values: &PropertyMap,
        output: &mut RenderOutput,
    ) -> Result<(), RegistryError> {
        for node in nodes {
            match node {
                TemplateNode::Text(expression) => {
                    let text = self
                        .document
                        .create_text_node(&expression.evaluate(values));
                    self.document.append_child(parent, text)?;
                    if !expression.is_static() {
                        output.bindings.push(Binding {
                            node: text,
                            target: BindingTarget::Text,
                            expression: expression.clone(),
                        });
                    }
                }
                TemplateNode::Element {
                    tag_name,
                    attributes,
                    children,
                } => {
                    let nested = self
                        .definitions
                        .get(tag_name)
                        .filter(|_| !self.rendering.iter().any(|tag| tag == tag_name))
                        .cloned();
                    if nested.is_none() && self.rendering.iter().any(|tag| tag == tag_name) {
                        warn!(target = "components", tag = %tag_name, "recursive component rendered as a plain element");
                    }

                    let element = match nested {
                        Some(definition) => {
                            self.render_nested(owner, definition, attributes, values, output)?
                        }
                        None => {
                            let element = self.document.create_element(tag_name);
                            for (name, expression) in attributes {
                                self.document.set_attribute(
                                    element,
                                    name,
                                    &expression.evaluate(values),
                                )?;
                            }
                            element
                        }
                    };

                    for (name, expression) in attributes {
                        if !expression.is_static() {
                            output.bindings.push(Binding {
                                node: element,
                                target: BindingTarget::Attribute(name.clone()),
                                expression: expression.clone(),
                            });
                        }
                    }

                    self.document.append_child(parent, element)?;
                    self.render_nodes(owner, children, element, values, output)?;
                }
            }
        }
        Ok(())
    }

    /// Instantiates a registered tag found inside another template. Attributes
    /// mapped to the child's properties seed its values.
    fn render_nested(
        &mut self,
        owner: InstanceHandle,
        definition: Rc<ComponentDefinition>,
        attributes: &[(String, Expression)],
        values: &PropertyMap,
        output: &mut RenderOutput,
    ) -> Result<NodeId, RegistryError> {
        let mut child_values = definition.defaults();
        let mut plain = Vec::new();
        for (name, expression) in attributes {
            let text = expression.evaluate(values);
            match definition.property_for_attribute(name) {
                Some(decl) => {
                    let value = PropertyValue::from_attribute(decl.ty(), &text)
                        .map_err(|err| conversion_mismatch(&definition, decl, err))?;
                    child_values.insert(decl.name().to_string(), value);
                    if !decl.reflects() {
                        plain.push((name.as_str(), text));
                    }
                }
                None => plain.push((name.as_str(), text)),
            }
        }

        let child = self.create_instance(definition, child_values, Some(owner))?;
        output.children.push(child);
        let child_host = self.instance(child)?.host;
        for (name, text) in plain {
            self.document.set_attribute(child_host, name, &text)?;
        }
        Ok(child_host)
    }

    /// Computes the values and binding text a change would produce without
    /// touching the instance. `None` means the value is already current.
    fn plan_change(
        &self,
        handle: InstanceHandle,
        decl: &PropertyDecl,
        value: &PropertyValue,
    ) -> Result<Option<PlannedChange>, RegistryError> {
        let instance = self.instance(handle)?;
        let old = instance
            .values
            .get(decl.name())
            .cloned()
            .unwrap_or_else(|| decl.default_value().clone());
        if old == *value {
            return Ok(None);
        }

        let mut values = instance.values.clone();
        values.insert(decl.name().to_string(), value.clone());
        let updates = instance
            .dependents
            .get(decl.name())
            .map(|indices| {
                indices
                    .iter()
                    .map(|index| {
                        let binding = &instance.bindings[*index];
                        (
                            binding.node,
                            binding.target.clone(),
                            binding.expression.evaluate(&values),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(PlannedChange {
            host: instance.host,
            old,
            values,
            updates,
        }))
    }

    /// Converts every attribute update headed for a nested host, all the way
    /// down, and reports the first one a child would reject.
    fn check_nested(&self, updates: &[BindingUpdate]) -> Result<(), RegistryError> {
        for (node, target, text) in updates {
            let BindingTarget::Attribute(name) = target else {
                continue;
            };
            let Some(child) = self.hosts.get(node).copied() else {
                continue;
            };
            let definition = self.definition_of(child)?;
            let Some(decl) = definition.property_for_attribute(name) else {
                continue;
            };
            let value = PropertyValue::from_attribute(decl.ty(), text)
                .map_err(|err| conversion_mismatch(&definition, decl, err))?;
            if let Some(change) = self.plan_change(child, decl, &value)? {
                self.check_nested(&change.updates)?;
            }
        }
        Ok(())
    }

    fn reflect(
        &mut self,
        host: NodeId,
        decl: &PropertyDecl,
        value: &PropertyValue,
    ) -> Result<(), RegistryError> {
        match value.to_attribute() {
            Some(text) => self
                .document
                .set_attribute(host, decl.attribute_name(), &text)?,
            None => self.document.remove_attribute(host, decl.attribute_name())?,
        };
        Ok(())
    }

    fn write_binding(
        &mut self,
        node: NodeId,
        target: &BindingTarget,
        text: &str,
    ) -> Result<(), RegistryError> {
        match target {
            BindingTarget::Text => {
                self.document.set_text(node, text)?;
            }
            BindingTarget::Attribute(name) => match self.hosts.get(&node).copied() {
                Some(child) => self.set_attribute(child, name, Some(text))?,
                None => {
                    self.document.set_attribute(node, name, text)?;
                }
            },
        }
        Ok(())
    }

    /// Fires `disposed` hooks depth-first and forgets the instances. Nodes are
    /// left for the caller to drop.
    fn teardown(&mut self, handle: InstanceHandle) {
        if let Ok(definition) = self.definition_of(handle) {
            if let Some(hooks) = definition.hooks() {
                hooks.disposed(handle);
            }
        }

        let Some(instance) = self.instances.remove(&handle) else {
            return;
        };
        self.hosts.remove(&instance.host);
        for child in instance.children {
            self.teardown(child);
        }
    }
}

fn declared<'d>(
    definition: &'d ComponentDefinition,
    name: &str,
) -> Result<&'d PropertyDecl, RegistryError> {
    definition
        .property(name)
        .ok_or_else(|| RegistryError::UnknownProperty {
            tag: definition.tag_name().to_string(),
            name: name.to_string(),
        })
}

fn check_type(
    definition: &ComponentDefinition,
    decl: &PropertyDecl,
    value: &PropertyValue,
) -> Result<(), RegistryError> {
    if decl.accepts(value) {
        return Ok(());
    }
    Err(RegistryError::TypeMismatch {
        tag: definition.tag_name().to_string(),
        name: decl.name().to_string(),
        expected: decl.ty(),
        found: value.kind().to_string(),
    })
}

fn conversion_mismatch(
    definition: &ComponentDefinition,
    decl: &PropertyDecl,
    err: ConversionError,
) -> RegistryError {
    RegistryError::TypeMismatch {
        tag: definition.tag_name().to_string(),
        name: decl.name().to_string(),
        expected: err.expected,
        found: format!("{:?}", err.value),
    }
}

fn attribute_value(
    decl: &PropertyDecl,
    value: Option<&str>,
) -> Result<PropertyValue, ConversionError> {
    match value {
        Some(raw) => PropertyValue::from_attribute(decl.ty(), raw),
        None if decl.ty() == PropertyType::Boolean => Ok(PropertyValue::Boolean(false)),
        None => Ok(decl.default_value().clone()),
    }
}

fn index_dependents(bindings: &[Binding]) -> HashMap<String, Vec<usize>> {
    let mut dependents: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, binding) in bindings.iter().enumerate() {
        for name in binding.expression.dependencies() {
            let entry = dependents.entry(name.to_string()).or_default();
            if !entry.contains(&index) {
                entry.push(index);
            }
        }
    }
    dependents
}
