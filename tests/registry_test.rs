use std::cell::RefCell;
use std::rc::Rc;

use frontier_elements::{
    ComponentDefinition, DomPatch, InstanceHandle, LifecycleHooks, PropertyDecl, PropertyMap,
    PropertyType, PropertyValue, Registry, RegistryError,
};
use serde_json::json;

fn counter(reflect: bool) -> ComponentDefinition {
    ComponentDefinition::builder("x-counter")
        .markup("<button title=\"{{label}}\">{{label}}: {{count}}</button>")
        .property(PropertyDecl::number("count", 0.0).reflect(reflect))
        .property(PropertyDecl::string("label", "Clicks"))
        .build()
        .expect("counter definition")
}

fn props(pairs: &[(&str, PropertyValue)]) -> PropertyMap {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

#[test]
fn instantiate_uses_declared_defaults() {
    let mut registry = Registry::new();
    registry.register("x-counter", counter(false)).unwrap();

    let handle = registry.instantiate("x-counter", PropertyMap::new()).unwrap();

    assert_eq!(
        registry.get_property(handle, "count").unwrap(),
        &PropertyValue::Number(0.0)
    );
    assert_eq!(
        registry.get_property(handle, "label").unwrap(),
        &PropertyValue::from("Clicks")
    );
    assert_eq!(
        registry.render_html(handle).unwrap(),
        "<x-counter><button title=\"Clicks\">Clicks: 0</button></x-counter>"
    );
}

#[test]
fn initial_properties_override_defaults() {
    let mut registry = Registry::new();
    registry.register("x-counter", counter(false)).unwrap();

    let handle = registry
        .instantiate(
            "x-counter",
            props(&[("count", PropertyValue::from(3)), ("label", "Taps".into())]),
        )
        .unwrap();

    assert_eq!(
        registry.render_html(handle).unwrap(),
        "<x-counter><button title=\"Taps\">Taps: 3</button></x-counter>"
    );
}

#[test]
fn duplicate_registration_keeps_first_definition() {
    let mut registry = Registry::new();
    registry.register("x-counter", counter(true)).unwrap();

    let replacement = ComponentDefinition::builder("x-counter")
        .markup("<p>replaced</p>")
        .build()
        .unwrap();
    let err = registry.register("x-counter", replacement).unwrap_err();
    assert_eq!(err, RegistryError::DuplicateTag("x-counter".into()));

    let handle = registry.instantiate("x-counter", PropertyMap::new()).unwrap();
    assert_eq!(registry.attribute(handle, "count").unwrap(), Some("0"));
}

#[test]
fn unknown_tag_is_rejected() {
    let mut registry = Registry::new();
    let err = registry
        .instantiate("undefined-tag", PropertyMap::new())
        .unwrap_err();
    assert_eq!(err, RegistryError::UnknownTag("undefined-tag".into()));
}

#[test]
fn register_validates_tag_names() {
    let mut registry = Registry::new();
    let definition = counter(false);
    assert_eq!(
        registry.register("counter", counter(false)).unwrap_err(),
        RegistryError::InvalidTagName("counter".into())
    );
    assert_eq!(
        registry.register("x-other", definition).unwrap_err(),
        RegistryError::TagMismatch {
            tag: "x-other".into(),
            definition: "x-counter".into(),
        }
    );
    assert!(registry.tags().is_empty());
}

#[test]
fn set_then_get_round_trips() {
    let mut registry = Registry::new();
    registry.register("x-counter", counter(false)).unwrap();
    let handle = registry.instantiate("x-counter", PropertyMap::new()).unwrap();

    let values = [
        ("count", PropertyValue::from(42)),
        ("count", PropertyValue::Number(-1.5)),
        ("label", PropertyValue::from("")),
        ("label", PropertyValue::from("a & \"b\"")),
    ];
    for (name, value) in values {
        registry.set_property(handle, name, value.clone()).unwrap();
        assert_eq!(registry.get_property(handle, name).unwrap(), &value);
    }

    assert_eq!(
        registry.render_html(handle).unwrap(),
        r#"<x-counter><button title="a &amp; &quot;b&quot;">a &amp; "b": -1.5</button></x-counter>"#
    );
}

#[test]
fn unknown_property_leaves_values_unchanged() {
    let mut registry = Registry::new();
    registry.register("x-counter", counter(false)).unwrap();
    let handle = registry
        .instantiate("x-counter", props(&[("count", PropertyValue::from(7))]))
        .unwrap();
    let before = registry.properties(handle).unwrap().clone();

    let err = registry
        .set_property(handle, "colour", PropertyValue::from("red"))
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::UnknownProperty {
            tag: "x-counter".into(),
            name: "colour".into(),
        }
    );
    assert_eq!(registry.properties(handle).unwrap(), &before);
    assert!(matches!(
        registry.get_property(handle, "colour"),
        Err(RegistryError::UnknownProperty { .. })
    ));
}

#[test]
fn type_mismatch_is_reported() {
    let mut registry = Registry::new();
    registry.register("x-counter", counter(false)).unwrap();

    let err = registry
        .instantiate("x-counter", props(&[("count", PropertyValue::from("five"))]))
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::TypeMismatch {
            tag: "x-counter".into(),
            name: "count".into(),
            expected: PropertyType::Number,
            found: "string".into(),
        }
    );

    let handle = registry.instantiate("x-counter", PropertyMap::new()).unwrap();
    let err = registry
        .set_property(handle, "label", PropertyValue::Boolean(true))
        .unwrap_err();
    assert!(matches!(err, RegistryError::TypeMismatch { .. }));
    assert_eq!(
        registry.get_property(handle, "label").unwrap(),
        &PropertyValue::from("Clicks")
    );
}

#[test]
fn undeclared_initial_property_is_rejected() {
    let mut registry = Registry::new();
    registry.register("x-counter", counter(false)).unwrap();
    let err = registry
        .instantiate("x-counter", props(&[("size", PropertyValue::from(2))]))
        .unwrap_err();
    assert!(matches!(err, RegistryError::UnknownProperty { .. }));
    assert_eq!(registry.instance_count(), 0);
}

#[test]
fn counter_reflects_count_attribute() {
    let mut registry = Registry::new();
    registry.register("x-counter", counter(true)).unwrap();
    let handle = registry.instantiate("x-counter", PropertyMap::new()).unwrap();
    assert_eq!(registry.attribute(handle, "count").unwrap(), Some("0"));

    registry
        .set_property(handle, "count", PropertyValue::from(5))
        .unwrap();

    assert_eq!(
        registry.get_property(handle, "count").unwrap(),
        &PropertyValue::Number(5.0)
    );
    assert_eq!(registry.attribute(handle, "count").unwrap(), Some("5"));
    assert!(registry
        .render_html(handle)
        .unwrap()
        .starts_with("<x-counter count=\"5\">"));
}

#[test]
fn unreflected_property_sets_no_attribute() {
    let mut registry = Registry::new();
    registry.register("x-counter", counter(false)).unwrap();
    let handle = registry.instantiate("x-counter", PropertyMap::new()).unwrap();
    registry
        .set_property(handle, "count", PropertyValue::from(5))
        .unwrap();
    assert_eq!(registry.attribute(handle, "count").unwrap(), None);
}

#[test]
fn boolean_reflection_toggles_presence() {
    let definition = ComponentDefinition::builder("x-toggle")
        .markup("<span>{{isOpen}}</span>")
        .property(PropertyDecl::boolean("isOpen", false).reflect(true))
        .build()
        .unwrap();
    let mut registry = Registry::new();
    registry.register("x-toggle", definition).unwrap();
    let handle = registry.instantiate("x-toggle", PropertyMap::new()).unwrap();

    assert_eq!(registry.attribute(handle, "is-open").unwrap(), None);
    registry
        .set_property(handle, "isOpen", PropertyValue::Boolean(true))
        .unwrap();
    assert_eq!(registry.attribute(handle, "is-open").unwrap(), Some(""));
    assert_eq!(
        registry.render_html(handle).unwrap(),
        "<x-toggle is-open><span>true</span></x-toggle>"
    );
    registry
        .set_property(handle, "isOpen", PropertyValue::Boolean(false))
        .unwrap();
    assert_eq!(registry.attribute(handle, "is-open").unwrap(), None);
}

#[test]
fn structured_values_reflect_as_json() {
    let definition = ComponentDefinition::builder("x-list")
        .property(PropertyDecl::new("items", PropertyType::Array, vec![json!(1)]).reflect(true))
        .build()
        .unwrap();
    let mut registry = Registry::new();
    registry.register("x-list", definition).unwrap();
    let handle = registry.instantiate("x-list", PropertyMap::new()).unwrap();

    registry
        .set_property(handle, "items", PropertyValue::Array(vec![json!("a"), json!(2)]))
        .unwrap();
    assert_eq!(
        registry.attribute(handle, "items").unwrap(),
        Some(r#"["a",2]"#)
    );
}

#[test]
fn attributes_convert_into_properties() {
    let mut registry = Registry::new();
    registry.register("x-counter", counter(true)).unwrap();
    let handle = registry.instantiate("x-counter", PropertyMap::new()).unwrap();

    registry.set_attribute(handle, "count", Some("05")).unwrap();
    assert_eq!(
        registry.get_property(handle, "count").unwrap(),
        &PropertyValue::Number(5.0)
    );
    assert_eq!(registry.attribute(handle, "count").unwrap(), Some("5"));

    let err = registry
        .set_attribute(handle, "count", Some("lots"))
        .unwrap_err();
    assert!(matches!(err, RegistryError::TypeMismatch { .. }));
    assert_eq!(
        registry.get_property(handle, "count").unwrap(),
        &PropertyValue::Number(5.0)
    );

    registry.set_attribute(handle, "count", None).unwrap();
    assert_eq!(
        registry.get_property(handle, "count").unwrap(),
        &PropertyValue::Number(0.0)
    );
    assert_eq!(registry.attribute(handle, "count").unwrap(), Some("0"));

    registry
        .set_attribute(handle, "data-role", Some("stat"))
        .unwrap();
    assert_eq!(registry.attribute(handle, "data-role").unwrap(), Some("stat"));
}

#[test]
fn boolean_attributes_follow_presence() {
    let definition = ComponentDefinition::builder("x-panel")
        .property(PropertyDecl::boolean("disabled", false))
        .build()
        .unwrap();
    let mut registry = Registry::new();
    registry.register("x-panel", definition).unwrap();
    let handle = registry.instantiate("x-panel", PropertyMap::new()).unwrap();

    registry
        .set_attribute(handle, "disabled", Some("false"))
        .unwrap();
    assert_eq!(
        registry.get_property(handle, "disabled").unwrap(),
        &PropertyValue::Boolean(true)
    );
    assert_eq!(registry.attribute(handle, "disabled").unwrap(), Some("false"));

    registry.set_attribute(handle, "disabled", None).unwrap();
    assert_eq!(
        registry.get_property(handle, "disabled").unwrap(),
        &PropertyValue::Boolean(false)
    );
}

#[test]
fn update_emits_targeted_patches() {
    let mut registry = Registry::new();
    registry.register("x-counter", counter(false)).unwrap();
    let handle = registry.instantiate("x-counter", PropertyMap::new()).unwrap();
    registry.drain_mutations();

    registry
        .set_property(handle, "count", PropertyValue::from(1))
        .unwrap();
    let patches = registry.drain_mutations();
    assert_eq!(patches.len(), 1);
    match &patches[0] {
        DomPatch::TextContent { value, .. } => assert_eq!(value, "Clicks: 1"),
        other => panic!("unexpected patch {other:?}"),
    }

    registry
        .set_property(handle, "label", PropertyValue::from("Hits"))
        .unwrap();
    let patches = registry.drain_mutations();
    assert_eq!(patches.len(), 2);
    assert!(patches
        .iter()
        .any(|patch| matches!(patch, DomPatch::Attribute { name, value, .. } if name == "title" && value == "Hits")));
}

fn board() -> ComponentDefinition {
    ComponentDefinition::builder("x-board")
        .markup("<section><x-counter count=\"{{total}}\" label=\"Score\" data-slot=\"main\"></x-counter></section>")
        .property(PropertyDecl::number("total", 10.0))
        .build()
        .unwrap()
}

#[test]
fn nested_components_follow_parent_bindings() {
    let mut registry = Registry::new();
    registry.register("x-counter", counter(true)).unwrap();
    registry.register("x-board", board()).unwrap();

    let parent = registry.instantiate("x-board", PropertyMap::new()).unwrap();
    let children = registry.children(parent).unwrap().to_vec();
    assert_eq!(children.len(), 1);
    let child = children[0];

    assert_eq!(registry.tag_name(child).unwrap(), "x-counter");
    assert_eq!(
        registry.get_property(child, "count").unwrap(),
        &PropertyValue::Number(10.0)
    );
    assert_eq!(
        registry.get_property(child, "label").unwrap(),
        &PropertyValue::from("Score")
    );
    assert_eq!(registry.attribute(child, "data-slot").unwrap(), Some("main"));

    registry
        .set_property(parent, "total", PropertyValue::from(12))
        .unwrap();
    assert_eq!(
        registry.get_property(child, "count").unwrap(),
        &PropertyValue::Number(12.0)
    );
    assert!(registry
        .render_html(parent)
        .unwrap()
        .contains("Score: 12</button>"));
}

fn wrap() -> ComponentDefinition {
    ComponentDefinition::builder("x-wrap")
        .markup("<x-counter count=\"{{v}}\"></x-counter><p>{{v}}</p>")
        .property(PropertyDecl::string("v", "1"))
        .build()
        .unwrap()
}

#[test]
fn rejected_nested_value_changes_nothing() {
    let mut registry = Registry::new();
    registry.register("x-counter", counter(true)).unwrap();
    registry.register("x-wrap", wrap()).unwrap();

    let parent = registry.instantiate("x-wrap", PropertyMap::new()).unwrap();
    let child = registry.children(parent).unwrap()[0];
    let before = registry.render_html(parent).unwrap();
    registry.drain_mutations();

    let err = registry
        .set_property(parent, "v", PropertyValue::from("abc"))
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::TypeMismatch { ref tag, ref name, .. } if tag == "x-counter" && name == "count"
    ));
    assert_eq!(
        registry.get_property(parent, "v").unwrap(),
        &PropertyValue::from("1")
    );
    assert_eq!(
        registry.get_property(child, "count").unwrap(),
        &PropertyValue::Number(1.0)
    );
    assert!(registry.drain_mutations().is_empty());
    assert_eq!(registry.render_html(parent).unwrap(), before);
    assert!(before.contains("<p>1</p>"));

    // the same bad value is still rejected on a second attempt
    assert!(registry
        .set_property(parent, "v", PropertyValue::from("abc"))
        .is_err());

    registry
        .set_property(parent, "v", PropertyValue::from("7"))
        .unwrap();
    assert_eq!(
        registry.get_property(child, "count").unwrap(),
        &PropertyValue::Number(7.0)
    );
    assert!(registry.render_html(parent).unwrap().contains("<p>7</p>"));
}

#[test]
fn rejection_two_levels_down_leaves_middle_untouched() {
    let relay = ComponentDefinition::builder("x-relay")
        .markup("<x-counter count=\"{{n}}\"></x-counter><i>{{n}}</i>")
        .property(PropertyDecl::string("n", "1"))
        .build()
        .unwrap();
    let outer = ComponentDefinition::builder("x-outer")
        .markup("<x-relay n=\"{{v}}\"></x-relay>")
        .property(PropertyDecl::string("v", "1"))
        .build()
        .unwrap();
    let mut registry = Registry::new();
    registry.register("x-counter", counter(false)).unwrap();
    registry.register("x-relay", relay).unwrap();
    registry.register("x-outer", outer).unwrap();

    let parent = registry.instantiate("x-outer", PropertyMap::new()).unwrap();
    let middle = registry.children(parent).unwrap()[0];
    registry.drain_mutations();

    let err = registry
        .set_property(parent, "v", PropertyValue::from("x"))
        .unwrap_err();
    assert!(matches!(err, RegistryError::TypeMismatch { ref tag, .. } if tag == "x-counter"));
    assert_eq!(
        registry.get_property(middle, "n").unwrap(),
        &PropertyValue::from("1")
    );
    assert_eq!(registry.attribute(middle, "n").unwrap(), Some("1"));
    assert!(registry.drain_mutations().is_empty());
}

#[test]
fn nested_failure_during_instantiate_cleans_up_earlier_children() {
    let pair = ComponentDefinition::builder("x-pair")
        .markup("<div><x-counter count=\"2\"></x-counter><x-counter count=\"{{v}}\"></x-counter></div>")
        .property(PropertyDecl::string("v", "bad"))
        .build()
        .unwrap();
    let mut registry = Registry::new();
    registry.register("x-counter", counter(true)).unwrap();
    registry.register("x-pair", pair).unwrap();
    let nodes_before = registry.document().len();

    let err = registry.instantiate("x-pair", PropertyMap::new()).unwrap_err();

    assert!(matches!(err, RegistryError::TypeMismatch { ref tag, .. } if tag == "x-counter"));
    assert_eq!(registry.instance_count(), 0);
    assert_eq!(registry.document().len(), nodes_before);
}

#[test]
fn dispose_drops_subtree_and_children() {
    let mut registry = Registry::new();
    registry.register("x-counter", counter(true)).unwrap();
    registry.register("x-board", board()).unwrap();

    let parent = registry.instantiate("x-board", PropertyMap::new()).unwrap();
    let root = registry.document().root();
    registry.mount(parent, root).unwrap();
    let child = registry.children(parent).unwrap()[0];
    let host = registry.host(parent).unwrap();
    assert_eq!(registry.instance_for_node(host), Some(parent));

    registry.dispose(parent).unwrap();

    assert_eq!(registry.instance_count(), 0);
    assert!(!registry.document().contains(host));
    assert!(registry
        .document()
        .get_node(root)
        .unwrap()
        .children
        .is_empty());
    assert_eq!(
        registry.get_property(child, "count").unwrap_err(),
        RegistryError::UnknownInstance(child)
    );
    assert_eq!(
        registry.dispose(parent).unwrap_err(),
        RegistryError::UnknownInstance(parent)
    );
}

#[test]
fn disposing_a_child_unhooks_parent_bindings() {
    let mut registry = Registry::new();
    registry.register("x-counter", counter(true)).unwrap();
    registry.register("x-board", board()).unwrap();

    let parent = registry.instantiate("x-board", PropertyMap::new()).unwrap();
    let child = registry.children(parent).unwrap()[0];
    registry.dispose(child).unwrap();

    assert!(registry.children(parent).unwrap().is_empty());
    registry
        .set_property(parent, "total", PropertyValue::from(3))
        .unwrap();
    assert_eq!(
        registry.render_html(parent).unwrap(),
        "<x-board><section></section></x-board>"
    );
}

#[derive(Default)]
struct Recorder {
    events: RefCell<Vec<String>>,
}

impl LifecycleHooks for Recorder {
    fn created(&self, instance: InstanceHandle, properties: &PropertyMap) {
        self.events
            .borrow_mut()
            .push(format!("created {instance} count={}", properties["count"]));
    }

    fn property_changed(
        &self,
        _instance: InstanceHandle,
        name: &str,
        old: &PropertyValue,
        new: &PropertyValue,
    ) {
        self.events
            .borrow_mut()
            .push(format!("changed {name} {old} -> {new}"));
    }

    fn disposed(&self, _instance: InstanceHandle) {
        self.events.borrow_mut().push("disposed".to_string());
    }
}

#[test]
fn lifecycle_hooks_fire_in_order() {
    let recorder = Rc::new(Recorder::default());
    let definition = ComponentDefinition::builder("x-tracked")
        .markup("<i>{{count}}</i>")
        .property(PropertyDecl::number("count", 1.0))
        .hooks(recorder.clone())
        .build()
        .unwrap();

    let mut registry = Registry::new();
    registry.register("x-tracked", definition).unwrap();
    let handle = registry.instantiate("x-tracked", PropertyMap::new()).unwrap();
    registry
        .set_property(handle, "count", PropertyValue::from(2))
        .unwrap();
    registry
        .set_property(handle, "count", PropertyValue::from(2))
        .unwrap();
    registry.dispose(handle).unwrap();

    assert_eq!(
        *recorder.events.borrow(),
        vec![
            format!("created {handle} count=1"),
            "changed count 1 -> 2".to_string(),
            "disposed".to_string(),
        ]
    );
}
