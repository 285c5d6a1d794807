//! GOCACHEPROG message types
//!
//! Both directions carry a stream of JSON values. Byte fields are base64
//! strings, matching how the Go toolchain encodes `[]byte`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Request command
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Get,
    Put,
    Close,
    /// Anything this helper does not implement
    Unknown(String),
}

impl Command {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Close => "close",
            Self::Unknown(name) => name,
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

impl From<String> for Command {
    fn from(name: String) -> Self {
        match name.as_str() {
            "get" => Self::Get,
            "put" => Self::Put,
            "close" => Self::Close,
            _ => Self::Unknown(name),
        }
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

/// Commands announced in the handshake
pub const KNOWN_COMMANDS: [Command; 3] = [Command::Get, Command::Put, Command::Close];

/// Request from the build tool
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Request {
    #[serde(rename = "ID")]
    pub id: i64,

    #[serde(rename = "Command", default)]
    pub command: Command,

    #[serde(rename = "ActionID", default, with = "base64_bytes")]
    pub action_id: Vec<u8>,

    #[serde(rename = "OutputID", default, with = "base64_bytes")]
    pub output_id: Vec<u8>,

    /// Older toolchains send the output ID under this name
    #[serde(rename = "ObjectID", default, with = "base64_bytes")]
    pub object_id: Vec<u8>,

    #[serde(rename = "BodySize", default)]
    pub body_size: i64,

    /// Put payload, read from the value following the request
    #[serde(skip)]
    pub body: Vec<u8>,
}

impl Request {
    /// Output ID, falling back to the deprecated `ObjectID` field
    pub fn output_id(&self) -> &[u8] {
        if self.output_id.is_empty() {
            &self.object_id
        } else {
            &self.output_id
        }
    }
}

/// Response to the build tool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "ID")]
    pub id: i64,

    #[serde(rename = "Err", default, skip_serializing_if = "String::is_empty")]
    pub err: String,

    #[serde(rename = "KnownCommands", default, skip_serializing_if = "Vec::is_empty")]
    pub known_commands: Vec<Command>,

    #[serde(rename = "Miss", default, skip_serializing_if = "is_false")]
    pub miss: bool,

    #[serde(
        rename = "OutputID",
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "base64_bytes"
    )]
    pub output_id: Vec<u8>,

    #[serde(rename = "Size", default, skip_serializing_if = "is_zero")]
    pub size: i64,

    #[serde(rename = "DiskPath", default, skip_serializing_if = "String::is_empty")]
    pub disk_path: String,
}

impl Response {
    /// Unsolicited first message listing supported commands
    pub fn handshake() -> Self {
        Self {
            known_commands: KNOWN_COMMANDS.to_vec(),
            ..Default::default()
        }
    }

    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn failure(id: i64, err: impl ToString) -> Self {
        Self {
            id,
            err: err.to_string(),
            ..Default::default()
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// `[]byte` as base64, with `null` accepted as empty
pub mod base64_bytes {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::de::Error as _;

    pub fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => decode(&encoded).map_err(D::Error::custom),
            None => Ok(Vec::new()),
        }
    }

    pub fn decode(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(encoded)
    }

    pub fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }
}
