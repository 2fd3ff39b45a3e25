//! XML-RPC codec for the legacy flat API.
//!
//! Values map onto `serde_json::Value` both ways:
//!
//! | XML-RPC                     | JSON            |
//! |-----------------------------|-----------------|
//! | `int`, `i4`, `i8`           | integer         |
//! | `boolean`                   | bool            |
//! | `double`                    | float           |
//! | `string` or untyped `value` | string          |
//! | `nil`                       | null            |
//! | `array`                     | array           |
//! | `struct`                    | object          |
//!
//! A `fault` response becomes [`BootstrapError::ConfigurationRejected`].

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Number, Value};

use hostnet_netconf::SetupNetworks;

use crate::error::BootstrapError;

/// Method name of the legacy flat API.
pub const SETUP_NETWORKS: &str = "setupNetworks";

/// Encode `setupNetworks(networks, bondings, options)`.
pub fn setup_networks_call(request: &SetupNetworks) -> Result<Vec<u8>, BootstrapError> {
    let encode = |v: Result<Value, serde_json::Error>| {
        v.map_err(|e| BootstrapError::Protocol(format!("cannot encode request: {}", e)))
    };
    let params = [
        encode(serde_json::to_value(&request.networks))?,
        encode(serde_json::to_value(&request.bondings))?,
        encode(serde_json::to_value(&request.options))?,
    ];
    encode_call(SETUP_NETWORKS, &params)
}

/// Encode a `methodCall` document.
pub fn encode_call(method: &str, params: &[Value]) -> Result<Vec<u8>, BootstrapError> {
    let mut enc = Encoder::new();
    enc.event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
    enc.start("methodCall")?;
    enc.element("methodName", method)?;
    enc.start("params")?;
    for param in params {
        enc.start("param")?;
        enc.value(param)?;
        enc.end("param")?;
    }
    enc.end("params")?;
    enc.end("methodCall")?;
    Ok(enc.finish())
}

/// Decode a `methodCall` document into its method name and parameters.
pub fn decode_call(body: &[u8]) -> Result<(String, Vec<Value>), BootstrapError> {
    let root = parse_document(body)?;
    if root.name != "methodCall" {
        return Err(malformed(format!("expected <methodCall>, got <{}>", root.name)));
    }

    let method = root.child("methodName")?.text.trim().to_string();
    let params = match root.find("params") {
        Some(params) => params
            .children
            .iter()
            .filter(|n| n.name == "param")
            .map(|param| decode_value(param.child("value")?))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    Ok((method, params))
}

/// Decode a `methodResponse` document into its single return value.
pub fn decode_response(body: &[u8]) -> Result<Value, BootstrapError> {
    let root = parse_document(body)?;
    if root.name != "methodResponse" {
        return Err(malformed(format!(
            "expected <methodResponse>, got <{}>",
            root.name
        )));
    }

    if let Some(fault) = root.find("fault") {
        let fault = decode_value(fault.child("value")?)?;
        return Err(BootstrapError::ConfigurationRejected {
            code: fault["faultCode"].as_i64().unwrap_or(-1),
            message: fault["faultString"].as_str().unwrap_or_default().to_string(),
        });
    }

    let param = root.child("params")?.child("param")?;
    decode_value(param.child("value")?)
}

// ============================================================================
// Encoding
// ============================================================================

struct Encoder {
    writer: Writer<Vec<u8>>,
}

impl Encoder {
    fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), BootstrapError> {
        self.writer
            .write_event(event)
            .map_err(|e| BootstrapError::Protocol(format!("cannot encode XML-RPC: {}", e)))
    }

    fn start(&mut self, tag: &str) -> Result<(), BootstrapError> {
        self.event(Event::Start(BytesStart::new(tag)))
    }

    fn end(&mut self, tag: &str) -> Result<(), BootstrapError> {
        self.event(Event::End(BytesEnd::new(tag)))
    }

    fn element(&mut self, tag: &str, text: &str) -> Result<(), BootstrapError> {
        self.start(tag)?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.end(tag)
    }

    fn value(&mut self, value: &Value) -> Result<(), BootstrapError> {
        self.start("value")?;
        match value {
            Value::Null => self.event(Event::Empty(BytesStart::new("nil")))?,
            Value::Bool(b) => self.element("boolean", if *b { "1" } else { "0" })?,
            Value::Number(n) => match n.as_i64() {
                Some(i) if i32::try_from(i).is_ok() => self.element("int", &i.to_string())?,
                Some(i) => self.element("i8", &i.to_string())?,
                None => self.element("double", &n.to_string())?,
            },
            Value::String(s) => self.element("string", s)?,
            Value::Array(items) => {
                self.start("array")?;
                self.start("data")?;
                for item in items {
                    self.value(item)?;
                }
                self.end("data")?;
                self.end("array")?;
            }
            Value::Object(members) => {
                self.start("struct")?;
                for (name, member) in members {
                    self.start("member")?;
                    self.element("name", name)?;
                    self.value(member)?;
                    self.end("member")?;
                }
                self.end("struct")?;
            }
        }
        self.end("value")
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Element tree of a parsed document.
#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn named(name: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            ..Self::default()
        }
    }

    fn find(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|n| n.name == name)
    }

    fn child(&self, name: &str) -> Result<&Node, BootstrapError> {
        self.find(name)
            .ok_or_else(|| malformed(format!("<{}> without <{}>", self.name, name)))
    }
}

fn malformed(detail: impl std::fmt::Display) -> BootstrapError {
    BootstrapError::Protocol(format!("invalid XML-RPC document: {}", detail))
}

fn top(stack: &mut [Node]) -> Result<&mut Node, BootstrapError> {
    stack.last_mut().ok_or_else(|| malformed("unbalanced elements"))
}

fn parse_document(body: &[u8]) -> Result<Node, BootstrapError> {
    let mut reader = Reader::from_reader(body);
    let mut stack = vec![Node::default()];

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => stack.push(Node::named(e.name().as_ref())),
            Event::Empty(e) => {
                let node = Node::named(e.name().as_ref());
                top(&mut stack)?.children.push(node);
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(malformed)?;
                top(&mut stack)?.text.push_str(&text);
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                top(&mut stack)?.text.push_str(&text);
            }
            Event::End(_) => {
                let node = match stack.pop() {
                    Some(node) if !stack.is_empty() => node,
                    _ => return Err(malformed("unbalanced elements")),
                };
                top(&mut stack)?.children.push(node);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(malformed("unexpected end of document"));
    }
    let mut document = stack.pop().unwrap_or_default();
    if document.children.len() != 1 {
        return Err(malformed("expected a single root element"));
    }
    Ok(document.children.remove(0))
}

fn decode_value(node: &Node) -> Result<Value, BootstrapError> {
    let Some(typed) = node.children.first() else {
        return Ok(Value::String(node.text.clone()));
    };
    let text = typed.text.trim();

    match typed.name.as_str() {
        "int" | "i4" | "i8" => text
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| malformed(format!("bad integer {:?}", text))),
        "boolean" => match text {
            "1" => Ok(Value::Bool(true)),
            "0" => Ok(Value::Bool(false)),
            other => Err(malformed(format!("bad boolean {:?}", other))),
        },
        "double" => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| malformed(format!("bad double {:?}", text))),
        "string" => Ok(Value::String(typed.text.clone())),
        "dateTime.iso8601" | "base64" => Ok(Value::String(text.to_string())),
        "nil" => Ok(Value::Null),
        "array" => typed
            .child("data")?
            .children
            .iter()
            .filter(|n| n.name == "value")
            .map(decode_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        "struct" => {
            let mut members = Map::new();
            for member in typed.children.iter().filter(|n| n.name == "member") {
                let name = member.child("name")?.text.clone();
                members.insert(name, decode_value(member.child("value")?)?);
            }
            Ok(Value::Object(members))
        }
        other => Err(malformed(format!("unsupported type <{}>", other))),
    }
}
