//! # Payload Templates
//!
//! A template is a JSON value whose strings may contain `${...}` placeholders.
//! Templates are compiled once when the renderer is built, so an unknown
//! placeholder fails the build instead of every message.
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `${node}` | node name |
//! | `${site}` | the node's site |
//! | `${attr.KEY}` | node attribute `KEY` |
//! | `${uplink}` | the node's uplink peer, or `external` |
//! | `${publisher}` | publisher name |
//! | `${topic}` | topic name |
//! | `${seq}` | per-publisher sequence number |
//! | `${timestamp}` | RFC 3339 wall-clock time |
//! | `${random}` | uniform float in `[0, 1)` |
//!
//! A string made of exactly one `${seq}`, `${random}` or `${attr.KEY}`
//! placeholder keeps the value's JSON type instead of becoming a string.

use super::codec::Payload;
use super::node::Node;
use crate::error::RenderError;
use crate::registry::Entity;
use rand::Rng;
use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, PartialEq)]
enum Placeholder {
    Node,
    Site,
    Attr(String),
    Uplink,
    Publisher,
    Topic,
    Seq,
    Timestamp,
    Random,
}

impl Placeholder {
    fn parse(token: &str) -> Result<Self, RenderError> {
        Ok(match token {
            "node" => Self::Node,
            "site" => Self::Site,
            "uplink" => Self::Uplink,
            "publisher" => Self::Publisher,
            "topic" => Self::Topic,
            "seq" => Self::Seq,
            "timestamp" => Self::Timestamp,
            "random" => Self::Random,
            _ => match token.strip_prefix("attr.") {
                Some(key) if !key.is_empty() => Self::Attr(key.to_string()),
                _ => return Err(RenderError::UnknownPlaceholder(token.to_string())),
            },
        })
    }

    fn token(&self) -> String {
        match self {
            Self::Node => "node".into(),
            Self::Site => "site".into(),
            Self::Attr(key) => format!("attr.{key}"),
            Self::Uplink => "uplink".into(),
            Self::Publisher => "publisher".into(),
            Self::Topic => "topic".into(),
            Self::Seq => "seq".into(),
            Self::Timestamp => "timestamp".into(),
            Self::Random => "random".into(),
        }
    }

    fn needs_node(&self) -> bool {
        matches!(self, Self::Node | Self::Site | Self::Attr(_) | Self::Uplink)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Slot(Placeholder),
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Const(Value),
    Text(Vec<Segment>),
    Array(Vec<Part>),
    Object(Vec<(String, Part)>),
}

/// Values a template is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub node: Option<&'a Node>,
    pub publisher: &'a str,
    pub topic: &'a str,
    pub sequence: u64,
}

/// A compiled template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    root: Part,
}

impl Template {
    /// Compile a template value.
    pub fn compile(source: &Value) -> Result<Self, RenderError> {
        Ok(Self {
            root: compile_part(source)?,
        })
    }

    /// Whether any placeholder needs node context.
    #[must_use]
    pub fn needs_node(&self) -> bool {
        part_needs_node(&self.root)
    }

    /// Evaluate against concrete bindings.
    pub fn render(&self, bindings: &RenderContext<'_>) -> Result<Payload, RenderError> {
        render_part(&self.root, bindings)
    }
}

fn compile_part(value: &Value) -> Result<Part, RenderError> {
    Ok(match value {
        Value::String(s) => {
            let segments = parse_segments(s)?;
            if segments.iter().all(|seg| matches!(seg, Segment::Literal(_))) {
                Part::Const(value.clone())
            } else {
                Part::Text(segments)
            }
        }
        Value::Array(items) => Part::Array(items.iter().map(compile_part).collect::<Result<_, _>>()?),
        Value::Object(fields) => Part::Object(
            fields
                .iter()
                .map(|(k, v)| compile_part(v).map(|part| (k.clone(), part)))
                .collect::<Result<_, _>>()?,
        ),
        other => Part::Const(other.clone()),
    })
}

fn parse_segments(s: &str) -> Result<Vec<Segment>, RenderError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        literal.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| RenderError::Unterminated(s.to_string()))?;

        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Slot(Placeholder::parse(after[..end].trim())?));
        rest = &after[end + 1..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn part_needs_node(part: &Part) -> bool {
    match part {
        Part::Const(_) => false,
        Part::Text(segments) => segments
            .iter()
            .any(|seg| matches!(seg, Segment::Slot(p) if p.needs_node())),
        Part::Array(items) => items.iter().any(part_needs_node),
        Part::Object(fields) => fields.iter().any(|(_, part)| part_needs_node(part)),
    }
}

fn render_part(part: &Part, b: &RenderContext<'_>) -> Result<Value, RenderError> {
    match part {
        Part::Const(value) => Ok(value.clone()),
        Part::Text(segments) => match segments.as_slice() {
            [Segment::Slot(slot)] => resolve(slot, b),
            _ => {
                let mut out = String::new();
                for seg in segments {
                    match seg {
                        Segment::Literal(text) => out.push_str(text),
                        Segment::Slot(slot) => match resolve(slot, b)? {
                            Value::String(s) => out.push_str(&s),
                            other => out.push_str(&other.to_string()),
                        },
                    }
                }
                Ok(Value::String(out))
            }
        },
        Part::Array(items) => items
            .iter()
            .map(|item| render_part(item, b))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Part::Object(fields) => {
            let mut map = Map::new();
            for (key, part) in fields {
                map.insert(key.clone(), render_part(part, b)?);
            }
            Ok(Value::Object(map))
        }
    }
}

fn resolve(slot: &Placeholder, b: &RenderContext<'_>) -> Result<Value, RenderError> {
    let node = || b.node.ok_or_else(|| RenderError::MissingNode(slot.token()));
    Ok(match slot {
        Placeholder::Node => Value::String(node()?.name().to_string()),
        Placeholder::Site => Value::String(node()?.site().name().to_string()),
        Placeholder::Attr(key) => {
            let node = node()?;
            node.attribute(key)
                .cloned()
                .ok_or_else(|| RenderError::MissingAttribute {
                    node: node.name().to_string(),
                    key: key.clone(),
                })?
        }
        Placeholder::Uplink => Value::String(node()?.uplink()),
        Placeholder::Publisher => Value::String(b.publisher.to_string()),
        Placeholder::Topic => Value::String(b.topic.to_string()),
        Placeholder::Seq => Value::Number(Number::from(b.sequence)),
        Placeholder::Timestamp => Value::String(chrono::Utc::now().to_rfc3339()),
        Placeholder::Random => {
            let x: f64 = rand::thread_rng().gen();
            Number::from_f64(x).map_or(Value::Null, Value::Number)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bindings(seq: u64) -> RenderContext<'static> {
        RenderContext {
            node: None,
            publisher: "p1",
            topic: "t1",
            sequence: seq,
        }
    }

    #[test]
    fn test_literals_are_constant() {
        let t = Template::compile(&json!({"a": 1, "b": "plain", "c": [true, null]})).unwrap();
        assert!(!t.needs_node());
        assert_eq!(
            t.render(&bindings(0)).unwrap(),
            json!({"a": 1, "b": "plain", "c": [true, null]})
        );
    }

    #[test]
    fn test_numeric_placeholders_keep_type() {
        let t = Template::compile(&json!({"seq": "${seq}", "label": "msg-${seq}", "r": "${random}"})).unwrap();
        let out = t.render(&bindings(7)).unwrap();
        assert_eq!(out["seq"], json!(7));
        assert_eq!(out["label"], json!("msg-7"));
        let r = out["r"].as_f64().unwrap();
        assert!((0.0..1.0).contains(&r));
    }

    #[test]
    fn test_publisher_topic_and_timestamp() {
        let t = Template::compile(&json!("${publisher}@${topic} ${timestamp}")).unwrap();
        let out = t.render(&bindings(0)).unwrap();
        let s = out.as_str().unwrap();
        assert!(s.starts_with("p1@t1 "));
        assert!(chrono::DateTime::parse_from_rfc3339(&s["p1@t1 ".len()..]).is_ok());
    }

    #[test]
    fn test_unknown_placeholder_fails_compile() {
        assert_eq!(
            Template::compile(&json!({"x": "${nope}"})),
            Err(RenderError::UnknownPlaceholder("nope".into()))
        );
        assert_eq!(
            Template::compile(&json!("${attr.}")),
            Err(RenderError::UnknownPlaceholder("attr.".into()))
        );
        assert!(matches!(
            Template::compile(&json!("${seq")),
            Err(RenderError::Unterminated(_))
        ));
    }

    #[test]
    fn test_node_placeholder_without_node() {
        let t = Template::compile(&json!({"d": "${node}"})).unwrap();
        assert!(t.needs_node());
        assert_eq!(
            t.render(&bindings(0)),
            Err(RenderError::MissingNode("node".into()))
        );
    }

    #[test]
    fn test_dollar_without_brace_is_literal() {
        let t = Template::compile(&json!("cost: $5")).unwrap();
        assert_eq!(t.render(&bindings(0)).unwrap(), json!("cost: $5"));
    }
}
