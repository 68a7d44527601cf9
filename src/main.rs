use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use frontier_elements::{Manifest, PropertyMap, PropertyType, PropertyValue, Registry};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: frontier-elements [manifest.yaml] <tag> [name=value ...]";

fn main() {
    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(html) => println!("{html}"),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    }
}

fn run(args: &[String]) -> Result<String> {
    let (explicit, rest) = match args.first() {
        Some(first) if first.ends_with(".yaml") || first.ends_with(".yml") => {
            (Some(PathBuf::from(first)), &args[1..])
        }
        _ => (None, args),
    };

    let Some((tag, assignments)) = rest.split_first() else {
        bail!("{USAGE}");
    };

    let path = Manifest::resolve_path(explicit)
        .ok_or_else(|| anyhow!("no manifest given and no config directory available"))?;
    let manifest = Manifest::load(&path)
        .with_context(|| format!("failed to load manifest {}", path.display()))?;

    let mut registry = Registry::new();
    let registered = manifest.register_all(&mut registry)?;
    info!(manifest = %path.display(), registered, "registered components");

    let definition = registry
        .definition(tag)
        .ok_or_else(|| anyhow!("<{tag}> is not declared in {}", path.display()))?;

    let mut initial = PropertyMap::new();
    for assignment in assignments {
        let (name, raw) = assignment
            .split_once('=')
            .map(|(name, raw)| (name, Some(raw)))
            .unwrap_or((assignment.as_str(), None));
        let decl = definition
            .property(name)
            .ok_or_else(|| anyhow!("<{tag}> has no property {name:?}"))?;
        let value = parse_argument(decl.ty(), raw)
            .with_context(|| format!("invalid value for {name:?}"))?;
        initial.insert(name.to_string(), value);
    }

    let handle = registry.instantiate(tag, initial)?;
    let root = registry.document().root();
    registry.mount(handle, root)?;
    Ok(registry.render_html(handle)?)
}

fn parse_argument(ty: PropertyType, raw: Option<&str>) -> Result<PropertyValue> {
    match (ty, raw) {
        (PropertyType::Boolean, None | Some("true")) => Ok(PropertyValue::Boolean(true)),
        (PropertyType::Boolean, Some("false")) => Ok(PropertyValue::Boolean(false)),
        (PropertyType::Boolean, Some(other)) => bail!("expected true or false, got {other:?}"),
        (_, None) => bail!("missing value"),
        (ty, Some(raw)) => Ok(PropertyValue::from_attribute(ty, raw)?),
    }
}
