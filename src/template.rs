use std::collections::BTreeSet;

use kuchiki::traits::*;
use kuchiki::NodeRef;
use thiserror::Error;

use crate::property::PropertyMap;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unterminated substitution in {0:?}")]
    Unterminated(String),
    #[error("empty substitution in {0:?}")]
    EmptyExpression(String),
    #[error("template markup has no body")]
    NoRoot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Binding(String),
}

/// Text with `{{ name }}` substitutions, as found in text nodes and attribute
/// values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    segments: Vec<Segment>,
}

impl Expression {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = raw;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after_open = &rest[start + 2..];
            let end = after_open
                .find("}}")
                .ok_or_else(|| TemplateError::Unterminated(raw.to_string()))?;
            let name = after_open[..end].trim();
            if name.is_empty() {
                return Err(TemplateError::EmptyExpression(raw.to_string()));
            }
            segments.push(Segment::Binding(name.to_string()));
            rest = &after_open[end + 2..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Binding(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Substitutes current values. A name missing from `values` renders as
    /// the empty string.
    pub fn evaluate(&self, values: &PropertyMap) -> String {
        let mut output = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => output.push_str(text),
                Segment::Binding(name) => {
                    if let Some(value) = values.get(name) {
                        output.push_str(&value.to_string());
                    }
                }
            }
        }
        output
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateNode {
    Element {
        tag_name: String,
        attributes: Vec<(String, Expression)>,
        children: Vec<TemplateNode>,
    },
    Text(Expression),
}

/// Parsed component markup. Immutable once parsed; instances render from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    roots: Vec<TemplateNode>,
}

impl Template {
    /// Parses markup as body content. Attributes on each element come out
    /// sorted by name, whatever order the markup wrote them in.
    pub fn parse(markup: &str) -> Result<Self, TemplateError> {
        // An explicit <body> keeps head-only tags like <style> in place.
        let document = kuchiki::parse_html().one(format!("<body>{markup}</body>"));
        let body = document
            .select_first("body")
            .map_err(|_| TemplateError::NoRoot)?;

        let mut roots = Vec::new();
        for child in body.as_node().children() {
            if let Some(node) = convert_node(&child)? {
                roots.push(node);
            }
        }

        Ok(Self { roots })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn roots(&self) -> &[TemplateNode] {
        &self.roots
    }

    /// Every property name referenced anywhere in the template.
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        let mut stack: Vec<&TemplateNode> = self.roots.iter().collect();
        while let Some(node) = stack.pop() {
            match node {
                TemplateNode::Text(expression) => {
                    names.extend(expression.dependencies().map(str::to_string));
                }
                TemplateNode::Element {
                    attributes,
                    children,
                    ..
                } => {
                    for (_, expression) in attributes {
                        names.extend(expression.dependencies().map(str::to_string));
                    }
                    stack.extend(children.iter());
                }
            }
        }
        names
    }
}

fn convert_node(node: &NodeRef) -> Result<Option<TemplateNode>, TemplateError> {
    if let Some(element) = node.as_element() {
        let mut attributes = element
            .attributes
            .borrow()
            .map
            .iter()
            .map(|(name, attribute)| {
                Expression::parse(&attribute.value).map(|value| (name.local.to_string(), value))
            })
            .collect::<Result<Vec<_>, _>>()?;
        attributes.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut children = Vec::new();
        for child in node.children() {
            if let Some(converted) = convert_node(&child)? {
                children.push(converted);
            }
        }

        return Ok(Some(TemplateNode::Element {
            tag_name: element.name.local.to_string(),
            attributes,
            children,
        }));
    }

    if let Some(text) = node.as_text() {
        let text = text.borrow();
        if text.trim().is_empty() {
            return Ok(None);
        }
        return Ok(Some(TemplateNode::Text(Expression::parse(&text)?)));
    }

    // comments and doctypes carry nothing renderable
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyValue;

    #[test]
    fn splits_literals_and_bindings() {
        let expression = Expression::parse("Count: {{ count }} of {{max}}").unwrap();
        assert_eq!(
            expression.segments(),
            &[
                Segment::Literal("Count: ".into()),
                Segment::Binding("count".into()),
                Segment::Literal(" of ".into()),
                Segment::Binding("max".into()),
            ]
        );
        assert!(!expression.is_static());
        assert!(Expression::parse("plain").unwrap().is_static());
    }

    #[test]
    fn rejects_malformed_substitutions() {
        assert_eq!(
            Expression::parse("{{ open"),
            Err(TemplateError::Unterminated("{{ open".into()))
        );
        assert_eq!(
            Expression::parse("a {{  }} b"),
            Err(TemplateError::EmptyExpression("a {{  }} b".into()))
        );
    }

    #[test]
    fn evaluates_against_values() {
        let expression = Expression::parse("{{label}}: {{count}}").unwrap();
        let mut values = PropertyMap::new();
        values.insert("label".into(), PropertyValue::from("Clicks"));
        values.insert("count".into(), PropertyValue::from(3));
        assert_eq!(expression.evaluate(&values), "Clicks: 3");
    }

    #[test]
    fn parses_markup_tree() {
        let template =
            Template::parse("<button class=\"btn {{kind}}\">{{label}}</button>\n  <span>hi</span>")
                .unwrap();
        assert_eq!(template.roots().len(), 2);

        match &template.roots()[0] {
            TemplateNode::Element {
                tag_name,
                attributes,
                children,
            } => {
                assert_eq!(tag_name, "button");
                assert_eq!(attributes.len(), 1);
                assert_eq!(attributes[0].0, "class");
                assert_eq!(children.len(), 1);
            }
            other => panic!("expected element, got {other:?}"),
        }

        let names: Vec<_> = template.dependencies().into_iter().collect();
        assert_eq!(names, vec!["kind".to_string(), "label".to_string()]);
    }

    #[test]
    fn drops_comments_and_keeps_style_in_body() {
        let template = Template::parse("<style>p {}</style><!-- note --><p>x</p>").unwrap();
        let tags: Vec<_> = template
            .roots()
            .iter()
            .filter_map(|node| match node {
                TemplateNode::Element { tag_name, .. } => Some(tag_name.as_str()),
                TemplateNode::Text(_) => None,
            })
            .collect();
        assert_eq!(tags, vec!["style", "p"]);
    }

    #[test]
    fn attributes_are_ordered_by_name() {
        let template = Template::parse("<a title=\"t\" href=\"{{url}}\" data-x=\"1\"></a>").unwrap();
        let TemplateNode::Element { attributes, .. } = &template.roots()[0] else {
            panic!("expected element");
        };
        let names: Vec<_> = attributes.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["data-x", "href", "title"]);
    }
}
