// Request and response envelopes carried by the message bus

use bluer::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AdapterError;

/// A typed argument or return value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    String(String),
    Boolean(bool),
    Uint32(u32),
    Byte(u8),
    StringArray(Vec<String>),
}

impl Value {
    pub fn type_code(&self) -> &'static str {
        match self {
            Self::String(_) => "s",
            Self::Boolean(_) => "b",
            Self::Uint32(_) => "u",
            Self::Byte(_) => "y",
            Self::StringArray(_) => "as",
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Uint32(value)
    }
}

impl From<u8> for Value {
    fn from(value: u8) -> Self {
        Self::Byte(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Self::StringArray(value)
    }
}

/// Concatenated type codes of `values`.
pub fn signature(values: &[Value]) -> String {
    values.iter().map(Value::type_code).collect()
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("empty message")]
    Empty,

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub serial: u32,
    pub path: String,
    pub interface: String,
    pub member: String,
    /// Caller identity; replies are addressed to it.
    pub sender: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub no_reply: bool,
}

impl Request {
    pub fn method_call(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        Self {
            serial: 0,
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            sender: String::new(),
            args: Vec::new(),
            no_reply: false,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_serial(mut self, serial: u32) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_no_reply(mut self) -> Self {
        self.no_reply = true;
        self
    }

    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Err(MessageError::Empty);
        }
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn signature(&self) -> String {
        signature(&self.args)
    }

    pub fn reply(&self, values: Vec<Value>) -> Response {
        Response {
            reply_serial: self.serial,
            destination: self.sender.clone(),
            body: Body::Return { values },
        }
    }

    pub fn error(&self, error: &AdapterError) -> Response {
        Response {
            reply_serial: self.serial,
            destination: self.sender.clone(),
            body: Body::Error {
                name: error.name(),
                message: error.to_string(),
            },
        }
    }

    pub fn respond(&self, result: Result<Vec<Value>, AdapterError>) -> Response {
        match result {
            Ok(values) => self.reply(values),
            Err(error) => self.error(&error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Body {
    Return { values: Vec<Value> },
    Error { name: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub reply_serial: u32,
    pub destination: String,
    #[serde(flatten)]
    pub body: Body,
}

impl Response {
    pub fn is_error(&self) -> bool {
        matches!(self.body, Body::Error { .. })
    }

    pub fn error_name(&self) -> Option<&str> {
        match &self.body {
            Body::Error { name, .. } => Some(name),
            Body::Return { .. } => None,
        }
    }

    pub fn values(&self) -> &[Value] {
        match &self.body {
            Body::Return { values } => values,
            Body::Error { .. } => &[],
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

pub fn string_arg(args: &[Value], index: usize) -> Result<&str, AdapterError> {
    match args.get(index) {
        Some(Value::String(value)) => Ok(value),
        _ => Err(AdapterError::invalid_parameter(format!(
            "argument {index} must be a string"
        ))),
    }
}

/// A string argument meant for display or storage. Control characters are
/// refused.
pub fn text_arg(args: &[Value], index: usize) -> Result<&str, AdapterError> {
    let text = string_arg(args, index)?;
    if text.chars().any(char::is_control) {
        return Err(AdapterError::invalid_parameter(format!(
            "argument {index} contains control characters"
        )));
    }
    Ok(text)
}

pub fn u32_arg(args: &[Value], index: usize) -> Result<u32, AdapterError> {
    match args.get(index) {
        Some(Value::Uint32(value)) => Ok(*value),
        _ => Err(AdapterError::invalid_parameter(format!(
            "argument {index} must be a u32"
        ))),
    }
}

/// Parses a `XX:XX:XX:XX:XX:XX` address argument.
pub fn address_arg(args: &[Value], index: usize) -> Result<Address, AdapterError> {
    let text = string_arg(args, index)?;
    if text.len() != 17 {
        return Err(AdapterError::invalid_parameter(format!(
            "'{text}' is not a device address"
        )));
    }
    text.parse()
        .map_err(|_| AdapterError::invalid_parameter(format!("'{text}' is not a device address")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_envelope() {
        let payload = br#"{
            "serial": 7,
            "path": "/org/bluez/hci0",
            "interface": "org.bluez.Adapter",
            "member": "SetRemoteAlias",
            "sender": "client-1",
            "args": [{"string": "00:0A:95:9D:68:16"}, {"string": "phone"}]
        }"#;
        let request = Request::parse(payload).expect("parse");
        assert_eq!(request.serial, 7);
        assert_eq!(request.signature(), "ss");
        assert!(!request.no_reply);
    }

    #[test]
    fn rejects_empty_and_malformed_payloads() {
        assert!(matches!(Request::parse(b"  \n"), Err(MessageError::Empty)));
        assert!(matches!(
            Request::parse(b"{\"path\": 1}"),
            Err(MessageError::Malformed(_))
        ));
    }

    #[test]
    fn signature_concatenates_type_codes() {
        let values = vec![
            Value::from("x"),
            Value::from(true),
            Value::from(5u32),
            Value::from(4u8),
            Value::from(vec!["a".to_string()]),
        ];
        assert_eq!(signature(&values), "sbuyas");
        assert_eq!(signature(&[]), "");
    }

    #[test]
    fn error_responses_carry_symbolic_names() {
        let request = Request::method_call("/org/bluez/hci0", "org.bluez.Adapter", "Nope")
            .with_sender("client-1")
            .with_serial(3);
        let response = request.error(&AdapterError::unknown_method("Nope"));
        assert_eq!(response.reply_serial, 3);
        assert_eq!(response.destination, "client-1");
        assert_eq!(response.error_name(), Some("org.bluez.Error.UnknownMethod"));

        let json = serde_json::to_value(&response).expect("encode");
        assert_eq!(json["type"], "error");
        assert_eq!(json["name"], "org.bluez.Error.UnknownMethod");
    }

    #[test]
    fn return_values_are_externally_tagged() {
        let request = Request::method_call("/org/bluez/hci0", "org.bluez.Adapter", "GetMode");
        let json = serde_json::to_value(request.reply(vec![Value::from("off")])).expect("encode");
        assert_eq!(json["type"], "return");
        assert_eq!(json["values"], serde_json::json!([{"string": "off"}]));
    }

    #[test]
    fn address_arguments_are_validated() {
        let args = vec![Value::from("00:0A:95:9D:68:16"), Value::from("nope")];
        assert_eq!(
            address_arg(&args, 0).expect("address").to_string(),
            "00:0A:95:9D:68:16"
        );
        assert!(matches!(
            address_arg(&args, 1),
            Err(AdapterError::InvalidParameter { .. })
        ));
        assert!(matches!(
            address_arg(&args, 2),
            Err(AdapterError::InvalidParameter { .. })
        ));
    }
}
