use crate::error::ParseError;

use super::block::parse_default_block_parameter;
use super::value::Value;

/// Which half of an [`RpcInput`] a block parser inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSource {
    Params,
    Result,
}

/// The capability the parser needs from a protocol message.
///
/// Concrete messages are protocol specific; the parser only ever reads the
/// params, the raw result bytes, and delegates block-string decoding.
pub trait RpcInput: Send + Sync {
    fn params(&self) -> &Value;

    fn result(&self) -> &[u8];

    /// Decode a stringified block reference into a canonical height.
    fn parse_block(&self, block: &str) -> Result<i64, ParseError>;
}

// ==============================================================================
// JSON-RPC Message
// ==============================================================================

/// A JSON-RPC style message: positional or named params, and the raw bytes of
/// the `result` member of a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcInput {
    params: Value,
    result: Vec<u8>,
}

impl JsonRpcInput {
    pub fn from_params(params: impl Into<Value>) -> Self {
        Self {
            params: params.into(),
            result: Vec::new(),
        }
    }

    pub fn from_result(result: impl Into<Vec<u8>>) -> Self {
        Self {
            params: Value::Null,
            result: result.into(),
        }
    }
}

impl From<serde_json::Value> for JsonRpcInput {
    fn from(params: serde_json::Value) -> Self {
        Self::from_params(Value::from(params))
    }
}

impl RpcInput for JsonRpcInput {
    fn params(&self) -> &Value {
        &self.params
    }

    fn result(&self) -> &[u8] {
        &self.result
    }

    fn parse_block(&self, block: &str) -> Result<i64, ParseError> {
        parse_default_block_parameter(block)
    }
}
