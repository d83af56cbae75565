//! Output schemas
//!
//! The structured executor describes the output it expects as a small
//! typed tree, renders that tree into the prompt as a JSON or XML
//! template, and conforms the model's reply back against it. Unknown
//! fields are discarded on parse; missing required fields are an error the
//! repair retry can fix.

use serde_json::{Map, Value};

/// Output wire format the model is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Xml,
}

/// A node in the schema tree.
#[derive(Debug, Clone)]
pub enum SchemaNode {
    Object(Vec<SchemaField>),
    Array(Box<SchemaNode>),
    String,
    Number,
    Boolean,
}

/// A named field with its description and required flag.
#[derive(Debug, Clone)]
pub struct SchemaField {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub node: SchemaNode,
}

impl SchemaField {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
        node: SchemaNode,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required,
            node,
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        Self::new(name, description, required, SchemaNode::String)
    }

    pub fn number(name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        Self::new(name, description, required, SchemaNode::Number)
    }
}

/// The schema for one structured response; the root is always an object.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub fields: Vec<SchemaField>,
}

impl OutputSchema {
    pub fn new(fields: Vec<SchemaField>) -> Self {
        Self { fields }
    }

    /// Names of the required top-level fields.
    pub fn required_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Render the template plus format instructions for the prompt.
    pub fn render_instructions(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Json => format!(
                "Respond with a single JSON object matching this template \
                 (descriptions explain each field, do not echo them):\n{}",
                self.render_json_template()
            ),
            OutputFormat::Xml => format!(
                "Respond with XML matching this template (descriptions \
                 explain each field, do not echo them):\n{}",
                self.render_xml_template()
            ),
        }
    }

    fn render_json_template(&self) -> String {
        let value = Self::json_template_node(&SchemaNode::Object(self.fields.clone()));
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
    }

    fn json_template_node(node: &SchemaNode) -> Value {
        match node {
            SchemaNode::Object(fields) => {
                let mut map = Map::new();
                for field in fields {
                    let label = if field.required { "" } else { " (optional)" };
                    let inner = match &field.node {
                        SchemaNode::String => {
                            Value::String(format!("string: {}{}", field.description, label))
                        }
                        SchemaNode::Number => {
                            Value::String(format!("number: {}{}", field.description, label))
                        }
                        SchemaNode::Boolean => {
                            Value::String(format!("boolean: {}{}", field.description, label))
                        }
                        nested => Self::json_template_node(nested),
                    };
                    map.insert(field.name.clone(), inner);
                }
                Value::Object(map)
            }
            SchemaNode::Array(item) => Value::Array(vec![Self::json_template_node(item)]),
            SchemaNode::String => Value::String("string".to_string()),
            SchemaNode::Number => Value::String("number".to_string()),
            SchemaNode::Boolean => Value::String("boolean".to_string()),
        }
    }

    fn render_xml_template(&self) -> String {
        let mut out = String::from("<response>\n");
        for field in &self.fields {
            Self::xml_template_field(field, 1, &mut out);
        }
        out.push_str("</response>");
        out
    }

    fn xml_template_field(field: &SchemaField, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        match &field.node {
            SchemaNode::Object(fields) => {
                out.push_str(&format!("{}<{}>\n", indent, field.name));
                for inner in fields {
                    Self::xml_template_field(inner, depth + 1, out);
                }
                out.push_str(&format!("{}</{}>\n", indent, field.name));
            }
            SchemaNode::Array(item) => {
                out.push_str(&format!("{}<{}>\n", indent, field.name));
                let item_field = SchemaField::new("item", field.description.clone(), true, (**item).clone());
                Self::xml_template_field(&item_field, depth + 1, out);
                out.push_str(&format!("{}<!-- repeat <item> as needed -->\n", "  ".repeat(depth + 1)));
                out.push_str(&format!("{}</{}>\n", indent, field.name));
            }
            SchemaNode::String | SchemaNode::Number | SchemaNode::Boolean => {
                let label = if field.required { "" } else { " (optional)" };
                out.push_str(&format!(
                    "{}<{}>{}{}</{}>\n",
                    indent, field.name, field.description, label, field.name
                ));
            }
        }
    }

    /// Parse model output in the given format and conform it.
    pub fn parse(&self, text: &str, format: OutputFormat) -> Result<Value, String> {
        match format {
            OutputFormat::Json => {
                let raw = extract_json(text).ok_or("no JSON object found in output")?;
                let value: Value =
                    serde_json::from_str(&raw).map_err(|e| format!("invalid JSON: {}", e))?;
                self.conform(&value)
            }
            OutputFormat::Xml => {
                let value = parse_xml_object(text, &self.fields)?;
                self.conform(&value)
            }
        }
    }

    /// Keep known fields, check required ones, coerce primitives. Errors
    /// name the offending path so the repair prompt can quote it.
    pub fn conform(&self, value: &Value) -> Result<Value, String> {
        conform_node(value, &SchemaNode::Object(self.fields.clone()), "$")
    }
}

fn conform_node(value: &Value, node: &SchemaNode, path: &str) -> Result<Value, String> {
    match node {
        SchemaNode::Object(fields) => {
            let Value::Object(map) = value else {
                return Err(format!("{}: expected object", path));
            };
            let mut out = Map::new();
            for field in fields {
                let field_path = format!("{}.{}", path, field.name);
                match map.get(&field.name) {
                    Some(Value::Null) | None => {
                        if field.required {
                            return Err(format!("{}: required field missing", field_path));
                        }
                    }
                    Some(inner) => {
                        out.insert(
                            field.name.clone(),
                            conform_node(inner, &field.node, &field_path)?,
                        );
                    }
                }
            }
            // Unknown fields in `map` are discarded here.
            Ok(Value::Object(out))
        }
        SchemaNode::Array(item) => {
            let Value::Array(items) = value else {
                return Err(format!("{}: expected array", path));
            };
            let mut out = Vec::with_capacity(items.len());
            for (i, inner) in items.iter().enumerate() {
                out.push(conform_node(inner, item, &format!("{}[{}]", path, i))?);
            }
            Ok(Value::Array(out))
        }
        SchemaNode::String => match value {
            Value::String(s) => Ok(Value::String(s.clone())),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(format!("{}: expected string", path)),
        },
        SchemaNode::Number => match value {
            Value::Number(n) => Ok(Value::Number(n.clone())),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("{}: expected number", path)),
            _ => Err(format!("{}: expected number", path)),
        },
        SchemaNode::Boolean => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(format!("{}: expected boolean", path)),
            },
            _ => Err(format!("{}: expected boolean", path)),
        },
    }
}

/// Pull the first top-level JSON object out of a reply that may carry
/// prose or code fences around it.
pub fn extract_json(text: &str) -> Option<String> {
    let text = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Find all non-overlapping `<tag>...</tag>` spans, returning inner text.
fn extract_tags<'a>(text: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut spans = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else { break };
        spans.push(&after[..end]);
        rest = &after[end + close.len()..];
    }
    spans
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Parse an object whose fields live as sibling tags in `text`.
fn parse_xml_object(text: &str, fields: &[SchemaField]) -> Result<Value, String> {
    let mut map = Map::new();
    for field in fields {
        let spans = extract_tags(text, &field.name);
        if spans.is_empty() {
            continue; // required-ness is enforced by conform()
        }
        let value = match &field.node {
            SchemaNode::Array(item) => {
                // Items are nested <item> tags; repeated field tags are
                // accepted too for lenient parsing.
                let container = spans[0];
                let item_spans = {
                    let nested = extract_tags(container, "item");
                    if nested.is_empty() && spans.len() > 1 {
                        spans.clone()
                    } else {
                        nested
                    }
                };
                let mut items = Vec::new();
                for span in item_spans {
                    items.push(parse_xml_node(span, item)?);
                }
                Value::Array(items)
            }
            node => parse_xml_node(spans[0], node)?,
        };
        map.insert(field.name.clone(), value);
    }
    Ok(Value::Object(map))
}

fn parse_xml_node(text: &str, node: &SchemaNode) -> Result<Value, String> {
    match node {
        SchemaNode::Object(fields) => parse_xml_object(text, fields),
        SchemaNode::Array(item) => {
            let mut items = Vec::new();
            for span in extract_tags(text, "item") {
                items.push(parse_xml_node(span, item)?);
            }
            Ok(Value::Array(items))
        }
        _ => Ok(Value::String(unescape_xml(text.trim()))),
    }
}
