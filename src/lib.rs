// Library exports for the CLI and integration tests

pub mod definition;
pub mod dom;
pub mod manifest;
pub mod property;
pub mod registry;
pub mod template;

pub use definition::{ComponentDefinition, DefinitionBuilder, DefinitionError, LifecycleHooks};
pub use dom::{DomPatch, DomTree, NodeId};
pub use manifest::{Manifest, ManifestError};
pub use property::{PropertyDecl, PropertyMap, PropertyType, PropertyValue};
pub use registry::{InstanceHandle, Registry, RegistryError};
pub use template::{Template, TemplateError};
