use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, warn};

use crate::definition::{ComponentDefinition, DefinitionError};
use crate::property::{PropertyDecl, PropertyType, PropertyValue};
use crate::registry::{Registry, RegistryError};

pub const MANIFEST_ENV: &str = "FRONTIER_ELEMENTS_MANIFEST";
const MANIFEST_FILE: &str = "components.yaml";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to read template {}: {source}", .path.display())]
    TemplateFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid definition for <{tag}>: {source}")]
    Definition {
        tag: String,
        source: DefinitionError,
    },
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PropertyEntry {
    #[serde(rename = "type")]
    ty: PropertyType,
    default: Option<PropertyValue>,
    #[serde(default)]
    reflect: bool,
    attribute: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ComponentEntry {
    tag: String,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    template_file: Option<PathBuf>,
    #[serde(default)]
    properties: BTreeMap<String, PropertyEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    components: Vec<ComponentEntry>,
}

/// Component definitions declared in a YAML file.
///
/// ```yaml
/// components:
///   - tag: x-counter
///     template: "<span>{{ count }}</span>"
///     properties:
///       count: { type: number, default: 0, reflect: true }
/// ```
pub struct Manifest {
    entries: Vec<ComponentEntry>,
    base_dir: Option<PathBuf>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let contents = fs::read_to_string(path)?;
        let mut manifest = Self::from_yaml(&contents)?;
        manifest.base_dir = path.parent().map(Path::to_path_buf);
        debug!(
            target = "components",
            path = %path.display(),
            components = manifest.entries.len(),
            "loaded manifest"
        );
        Ok(manifest)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ManifestError> {
        let file: ManifestFile = serde_yaml::from_str(contents)?;
        Ok(Self {
            entries: file.components,
            base_dir: None,
        })
    }

    /// Picks the manifest path: an explicit path, then the
    /// `FRONTIER_ELEMENTS_MANIFEST` variable, then `components.yaml` in the
    /// user config directory.
    pub fn resolve_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
        explicit
            .or_else(|| std::env::var(MANIFEST_ENV).ok().map(PathBuf::from))
            .or_else(|| {
                ProjectDirs::from("org", "Frontier", "frontier-elements")
                    .map(|dirs| dirs.config_dir().join(MANIFEST_FILE))
            })
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.tag.as_str())
    }

    pub fn definitions(&self) -> Result<Vec<ComponentDefinition>, ManifestError> {
        self.entries
            .iter()
            .map(|entry| self.build_definition(entry))
            .collect()
    }

    /// Registers every definition, in file order. Stops at the first error;
    /// earlier registrations stay in effect.
    pub fn register_all(&self, registry: &mut Registry) -> Result<usize, ManifestError> {
        let mut registered = 0;
        for entry in &self.entries {
            let definition = self.build_definition(entry)?;
            registry.register(&entry.tag, definition)?;
            registered += 1;
        }
        Ok(registered)
    }

    fn build_definition(&self, entry: &ComponentEntry) -> Result<ComponentDefinition, ManifestError> {
        let markup = match (&entry.template, &entry.template_file) {
            (Some(markup), file) => {
                if file.is_some() {
                    warn!(
                        target = "components",
                        tag = %entry.tag,
                        "both template and template_file given; using template"
                    );
                }
                markup.clone()
            }
            (None, Some(file)) => {
                let path = match &self.base_dir {
                    Some(base) if file.is_relative() => base.join(file),
                    _ => file.clone(),
                };
                fs::read_to_string(&path)
                    .map_err(|source| ManifestError::TemplateFile { path, source })?
            }
            (None, None) => String::new(),
        };

        let mut builder = ComponentDefinition::builder(entry.tag.clone()).markup(markup);
        for (name, property) in &entry.properties {
            let default = property
                .default
                .clone()
                .unwrap_or_else(|| zero_value(property.ty));
            let mut decl = PropertyDecl::new(name.clone(), property.ty, default)
                .reflect(property.reflect);
            if let Some(attribute) = &property.attribute {
                decl = decl.attribute(attribute.clone());
            }
            builder = builder.property(decl);
        }

        builder.build().map_err(|source| ManifestError::Definition {
            tag: entry.tag.clone(),
            source,
        })
    }
}

fn zero_value(ty: PropertyType) -> PropertyValue {
    match ty {
        PropertyType::String => PropertyValue::String(String::new()),
        PropertyType::Number => PropertyValue::Number(0.0),
        PropertyType::Boolean => PropertyValue::Boolean(false),
        PropertyType::Object => PropertyValue::Object(JsonMap::new()),
        PropertyType::Array => PropertyValue::Array(Vec::<JsonValue>::new()),
    }
}
