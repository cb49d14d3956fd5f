//! Messages exchanged between a hook-tool process and the agent.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One hook-tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Unique id of this request, for logging.
    pub id: Uuid,

    /// Credential identifying the hook execution the tool runs in.
    pub context_id: String,

    /// Name of the tool, e.g. `relation-get`.
    pub command: String,

    /// Arguments after the tool name.
    pub args: Vec<String>,

    /// Working directory of the calling process.
    pub dir: PathBuf,
}

impl ToolRequest {
    /// Creates a request with a fresh id.
    pub fn new(
        context_id: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            context_id: context_id.into(),
            command: command.into(),
            args,
            dir: dir.into(),
        }
    }
}

/// What the tool process should print and exit with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Exit code.
    pub code: i32,

    /// Bytes for standard output.
    #[serde(with = "serde_bytes_compat")]
    pub stdout: Vec<u8>,

    /// Bytes for standard error.
    #[serde(with = "serde_bytes_compat")]
    pub stderr: Vec<u8>,
}

impl ToolResponse {
    /// A successful invocation that printed `stdout`.
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// A failed invocation; `message` is printed as `error: <message>`.
    pub fn failure(code: i32, message: impl std::fmt::Display) -> Self {
        Self {
            code,
            stdout: Vec::new(),
            stderr: format!("error: {message}\n").into_bytes(),
        }
    }
}

/// Why the server refused to dispatch a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable reason.
    pub code: String,

    /// Human-readable reason.
    pub message: String,
}

/// Encodes byte vectors as CBOR byte strings rather than integer arrays.
mod serde_bytes_compat {
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a byte string")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(v)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(byte) = seq.next_element()? {
                    bytes.push(byte);
                }
                Ok(bytes)
            }
        }

        deserializer.deserialize_byte_buf(BytesVisitor)
    }
}
