//! Wire format (§6): newline-delimited JSON-RPC 1.0 over raw TCP.

use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// A request or notification received from a miner. Requests carry an `id`;
/// notifications (`mining.submit` replies go the other way) never do, but
/// in Stratum v1 every client->server message is technically a request, so
/// this type covers both.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// A JSON-RPC error triple: `[code, message, null]` (§6, §7). Real Stratum
/// clients expect this wire shape exactly — a 3-element array, not an
/// object with named fields.
#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl Serialize for RpcError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.code)?;
        tuple.serialize_element(&self.message)?;
        tuple.serialize_element(&self.data)?;
        tuple.end()
    }
}

/// A reply to a specific request `id` (§6).
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub id: Value,
    pub result: Value,
    pub error: Option<RpcError>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    /// `result` is part of the caller's contract, not always `null` —
    /// rejected `mining.submit`s carry `result: false` alongside the error
    /// array (§6, §8 scenario 4).
    pub fn err(id: Value, result: Value, error: RpcError) -> Self {
        Self { id, result, error: Some(error) }
    }
}

/// A server-initiated message with no `id` (`mining.notify`,
/// `mining.set_difficulty`) (§6).
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Value,
    pub method: String,
    pub params: Vec<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: Value::Null,
            method: method.into(),
            params,
        }
    }
}

/// Build the `mining.notify` params array from a published job (§6).
pub fn notify_params(job: &crate::job::Job, prevhash_wire_hex: &str) -> Vec<Value> {
    let merkle_branch: Vec<Value> = job
        .merkle_branch
        .iter()
        .map(|h| Value::String(hex::encode(h)))
        .collect();
    vec![
        Value::String(job.job_id.clone()),
        Value::String(prevhash_wire_hex.to_string()),
        Value::String(job.coinb1.clone()),
        Value::String(job.coinb2.clone()),
        Value::Array(merkle_branch),
        Value::String(format!("{:08x}", job.version)),
        Value::String(format!("{:08x}", job.nbits)),
        Value::String(format!("{:08x}", job.ntime)),
        Value::Bool(job.clean_jobs),
    ]
}

/// Serialize any outbound message as a single newline-terminated JSON line,
/// the framing the whole protocol relies on (§6).
pub fn encode_line<T: Serialize>(message: &T) -> std::io::Result<String> {
    let mut line = serde_json::to_string(message)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_parses_subscribe() {
        let line = r#"{"id":1,"method":"mining.subscribe","params":["cpuminer/2.5.0"]}"#;
        let msg: ClientMessage = serde_json::from_str(line).unwrap();
        assert_eq!(msg.method, "mining.subscribe");
        assert_eq!(msg.params.len(), 1);
    }

    #[test]
    fn rpc_error_serializes_as_a_three_element_array() {
        let resp = Response::err(
            Value::from(1),
            Value::Bool(false),
            RpcError::new(23, "Low difficulty share"),
        );
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(
            json,
            r#"{"id":1,"result":false,"error":[23,"Low difficulty share",null]}"#
        );
    }

    #[test]
    fn duplicate_share_rejection_matches_the_documented_wire_string() {
        let resp = Response::err(
            Value::from(7),
            Value::Bool(false),
            RpcError::new(22, "Duplicate share"),
        );
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(
            json,
            r#"{"id":7,"result":false,"error":[22,"Duplicate share",null]}"#
        );
    }

    #[test]
    fn encode_line_is_newline_terminated() {
        let n = Notification::new("mining.set_difficulty", vec![Value::from(4.0)]);
        let line = encode_line(&n).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }
}
