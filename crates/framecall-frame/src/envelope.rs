use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Opaque per-call correlation identifier.
///
/// Clients generate ids as `c0`, `c1`, ... from a per-instance counter. Hosts only
/// echo them back, so any string is accepted on decode. Older hosts echo numeric
/// ids; those decode to their decimal string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Wrap an arbitrary id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id for the `seq`-th call of a client instance.
    pub fn from_sequence(seq: u64) -> Self {
        Self(format!("c{seq}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallId({})", self.0)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for CallId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawCallId {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match RawCallId::deserialize(deserializer)? {
            RawCallId::Text(text) => Self(text),
            RawCallId::Number(number) => Self(number.to_string()),
        })
    }
}

/// Error object carried by reply envelopes.
///
/// `code == 0` is the success sentinel; every other value is a failure reported
/// verbatim to the caller. Decoding is lenient: an error object without an
/// integer `code`, or an `error` that is not an object at all, becomes
/// [`RemoteError::UNEXPECTED_REPLY`] so the call still rejects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("remote error {code}: {message}")]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
}

impl RemoteError {
    /// The success sentinel code.
    pub const SUCCESS: i64 = 0;

    /// Code for replies whose error object cannot be interpreted.
    pub const UNEXPECTED_REPLY: i64 = -1001;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The `{code: 0, message: ""}` object hosts attach to successful replies.
    pub fn success() -> Self {
        Self::new(Self::SUCCESS, "")
    }

    pub fn is_success(&self) -> bool {
        self.code == Self::SUCCESS
    }

    fn from_value(raw: Value) -> Self {
        let fields = match raw {
            Value::Object(fields) => fields,
            other => return Self::new(Self::UNEXPECTED_REPLY, message_text(Some(&other))),
        };
        let code = fields
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(Self::UNEXPECTED_REPLY);
        Self::new(code, message_text(fields.get("message")))
    }
}

impl<'de> Deserialize<'de> for RemoteError {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

fn message_text(message: Option<&Value>) -> String {
    match message {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// Keeps an explicit `null` as `Some(Value::Null)`; only an absent field is `None`.
fn present_value<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Structured message exchanged between the embedded context and its host.
///
/// Requests carry `method` and `settings`; replies carry the echoed `callId` and
/// either `result` or `error`. Missing `appId`, `method` and `settings` decode to
/// empty values so hosts may send minimal replies.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
    /// Session token. Treated as credential material and redacted in debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Legacy shared secret. Redacted in debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_secret: Option<String>,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl Envelope {
    /// Build an outbound request envelope without id or credentials.
    pub fn request(
        app_id: impl Into<String>,
        method: impl Into<String>,
        settings: Map<String, Value>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            method: method.into(),
            settings,
            ..Self::default()
        }
    }

    /// Build a successful reply for `call_id`.
    pub fn reply(call_id: CallId, result: Value) -> Self {
        Self {
            call_id: Some(call_id),
            result: Some(result),
            error: Some(RemoteError::success()),
            ..Self::default()
        }
    }

    /// Build a failed reply for `call_id`.
    pub fn failure(call_id: CallId, error: RemoteError) -> Self {
        Self {
            call_id: Some(call_id),
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_call_id(mut self, call_id: CallId) -> Self {
        self.call_id = Some(call_id);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_consumer_secret(mut self, secret: impl Into<String>) -> Self {
        self.consumer_secret = Some(secret.into());
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    /// Whether this envelope carries a reply rather than a request.
    pub fn is_reply(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    /// Interpret a reply envelope.
    ///
    /// A missing error object or `error.code == 0` is success with `result`
    /// (`null` when absent). Any other code is the failure.
    pub fn into_outcome(self) -> std::result::Result<Value, RemoteError> {
        match self.error {
            Some(error) if !error.is_success() => Err(error),
            _ => Ok(self.result.unwrap_or(Value::Null)),
        }
    }

    /// Encode as a JSON payload.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from a JSON payload.
    pub fn from_json_slice(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Envelope");
        dbg.field("app_id", &self.app_id)
            .field("call_id", &self.call_id)
            .field("method", &self.method)
            .field("settings", &self.settings);
        redacted_field(&mut dbg, "token", self.token.as_deref());
        redacted_field(&mut dbg, "consumer_secret", self.consumer_secret.as_deref());
        dbg.field("result", &self.result)
            .field("error", &self.error)
            .finish()
    }
}

fn redacted_field(dbg: &mut fmt::DebugStruct<'_, '_>, name: &str, value: Option<&str>) {
    match value {
        Some(secret) => dbg.field(name, &format_args!("<redacted:{} bytes>", secret.len())),
        None => dbg.field(name, &Option::<String>::None),
    };
}
