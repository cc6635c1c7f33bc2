//! Wire protocol for the image service.
//!
//! Every message is one JSON object terminated by a NUL byte, exchanged
//! over a Unix domain socket.
//!
//! ```text
//! call:   {"method": "io.wharf.PushImage", "parameters": {…}, "more": true}
//! reply:  {"parameters": {…}, "continues": true}
//! error:  {"error": "io.wharf.ImageNotFound", "parameters": {…}}
//! ```

use std::ops::Not;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Interface name prefixed to every image method.
pub const INTERFACE: &str = "io.wharf";

/// Maximum size of a single message, terminator excluded: 16 MiB.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Error: no image matches the given name or id.
pub const ERROR_IMAGE_NOT_FOUND: &str = "io.wharf.ImageNotFound";
/// Error: no container matches the given name or id.
pub const ERROR_CONTAINER_NOT_FOUND: &str = "io.wharf.ContainerNotFound";
/// Error: any other failure, with a human-readable reason.
pub const ERROR_OCCURRED: &str = "io.wharf.ErrorOccurred";
/// Error: the method is not served.
pub const ERROR_METHOD_NOT_FOUND: &str = "org.varlink.service.MethodNotFound";
/// Error: the call parameters could not be decoded.
pub const ERROR_INVALID_PARAMETER: &str = "org.varlink.service.InvalidParameter";

/// Service description method.
pub const METHOD_GET_INFO: &str = "org.varlink.service.GetInfo";

/// A method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,
    /// Caller accepts partial replies before the terminal one
    #[serde(default, skip_serializing_if = "Not::not")]
    pub more: bool,
    /// Caller wants no reply at all
    #[serde(default, skip_serializing_if = "Not::not")]
    pub oneway: bool,
}

impl Request {
    pub fn new(method: impl Into<String>, parameters: Value) -> Self {
        Self {
            method: method.into(),
            parameters,
            more: false,
            oneway: false,
        }
    }

    /// Decode the parameters. A missing parameter object decodes as `{}`.
    pub fn decode_parameters<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.parameters {
            Value::Null => serde_json::from_value(Value::Object(Default::default())),
            other => serde_json::from_value(other.clone()),
        }
    }
}

/// A reply: success (partial or terminal) or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,
    /// More replies follow for the same call
    #[serde(default, skip_serializing_if = "Not::not")]
    pub continues: bool,
}

impl Reply {
    /// Terminal success reply.
    pub fn ok(parameters: Value) -> Self {
        Self {
            error: None,
            parameters,
            continues: false,
        }
    }

    /// Partial reply of a streaming call.
    pub fn partial(parameters: Value) -> Self {
        Self {
            error: None,
            parameters,
            continues: true,
        }
    }

    /// Terminal error reply.
    pub fn error(name: impl Into<String>, parameters: Value) -> Self {
        Self {
            error: Some(name.into()),
            parameters,
            continues: false,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether this reply ends its call.
    pub fn is_terminal(&self) -> bool {
        self.is_error() || !self.continues
    }
}

/// `{field: value}`, the shape of every successful reply.
pub fn single_field<T: Serialize>(field: &str, value: &T) -> serde_json::Result<Value> {
    let mut map = serde_json::Map::new();
    map.insert(field.to_string(), serde_json::to_value(value)?);
    Ok(Value::Object(map))
}

/// Framing and decoding errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message exceeds {} bytes", MAX_MESSAGE_SIZE)]
    TooLarge,

    #[error("connection closed in the middle of a message")]
    Truncated,

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Read one message.
///
/// Returns `Ok(None)` on a clean EOF between messages.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut buf = Vec::new();
    let limit = (MAX_MESSAGE_SIZE + 1) as u64;
    let n = (&mut *reader).take(limit).read_until(0, &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&0) {
        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge);
        }
        return Err(ProtocolError::Truncated);
    }
    buf.pop();
    Ok(Some(serde_json::from_slice(&buf)?))
}

/// Write one message followed by its NUL terminator.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut buf = serde_json::to_vec(message)?;
    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge);
    }
    buf.push(0);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
