//! Messages exchanged with the cloud broker.
//!
//! Outbound property reports are wrapped in a [`ReportEnvelope`] and embedded
//! in the quoted argument of a publish command, which requires [`escape`]-ing
//! quotes and commas. Inbound push messages decode into a [`ControlMessage`].

use alloc::{
    collections::BTreeMap,
    format,
    string::{String, ToString},
};
use core::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

/// Prefix of the correlation token attached to every report.
pub const CLIENT_TOKEN_PREFIX: &str = "msgpub-token-";

/// The value of a device property.
///
/// Properties are JSON scalars; the variant is chosen by the JSON type.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Integer(i64),
    /// Floating-point value.
    Float(f64),
    /// String value.
    String(String),
}

impl Value {
    /// Returns the value as an integer, if it is one.
    ///
    /// Booleans are mapped to `0`/`1` since dashboards commonly send switches as either.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            Self::Integer(val) => Some(val),
            Self::Bool(val) => Some(val.into()),
            _ => None,
        }
    }

    /// Returns whether the value represents an "on" switch state.
    #[must_use]
    pub fn is_on(&self) -> bool {
        self.as_integer() == Some(1)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Bool(val) => write!(f, "{val}"),
            Self::Integer(val) => write!(f, "{val}"),
            Self::Float(val) => write!(f, "{val}"),
            Self::String(val) => write!(f, "{val:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(val: bool) -> Self {
        Self::Bool(val)
    }
}

impl From<u8> for Value {
    fn from(val: u8) -> Self {
        Self::Integer(val.into())
    }
}

impl From<u16> for Value {
    fn from(val: u16) -> Self {
        Self::Integer(val.into())
    }
}

impl From<u32> for Value {
    fn from(val: u32) -> Self {
        Self::Integer(val.into())
    }
}

impl From<i32> for Value {
    fn from(val: i32) -> Self {
        Self::Integer(val.into())
    }
}

impl From<i64> for Value {
    fn from(val: i64) -> Self {
        Self::Integer(val)
    }
}

impl From<f64> for Value {
    fn from(val: f64) -> Self {
        Self::Float(val)
    }
}

impl From<&str> for Value {
    fn from(val: &str) -> Self {
        Self::String(val.to_string())
    }
}

impl From<String> for Value {
    fn from(val: String) -> Self {
        Self::String(val)
    }
}

/// Decoded inbound push message.
///
/// Constructed per inbound frame and handed to the device facade.
#[derive(Deserialize, PartialEq, Clone, Debug)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Requested property changes.
    Control {
        /// Correlation token chosen by the cloud.
        #[serde(rename = "clientToken")]
        client_token: String,
        /// Requested values, by property name.
        params: BTreeMap<String, Value>,
    },
    /// Acknowledgement of a previously sent report.
    ReportReply {
        /// Correlation token of the acknowledged report.
        #[serde(rename = "clientToken")]
        client_token: String,
        /// Result code, `0` on success.
        code: i64,
        /// Human-readable status.
        status: String,
    },
}

/// Outbound report envelope.
#[derive(Serialize, Debug)]
pub struct ReportEnvelope<'a> {
    #[serde(rename = "clientToken")]
    client_token: String,
    method: &'static str,
    params: &'a BTreeMap<String, Value>,
}

impl<'a> ReportEnvelope<'a> {
    /// Constructs a report envelope for the given sequence number.
    #[must_use]
    pub fn new(seq: u32, params: &'a BTreeMap<String, Value>) -> Self {
        Self {
            client_token: client_token(seq),
            method: "report",
            params,
        }
    }

    /// Returns the correlation token of this report.
    #[must_use]
    pub fn client_token(&self) -> &str {
        &self.client_token
    }

    /// Serializes the envelope and escapes it for a quoted command argument.
    pub fn to_escaped(&self) -> Result<String, serde_json::Error> {
        Ok(escape(&serde_json::to_string(self)?))
    }
}

/// Builds the correlation token for a report sequence number.
#[must_use]
pub fn client_token(seq: u32) -> String {
    format!("{CLIENT_TOKEN_PREFIX}{seq:012}")
}

/// Escapes text for embedding in a quoted command argument.
///
/// The AT command parser splits arguments on commas and terminates
/// strings on quotes, so both are prefixed with a backslash.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);

    for c in text.chars() {
        if matches!(c, '"' | ',') {
            out.push('\\');
        }

        out.push(c);
    }

    out
}

/// Reverses [`escape`].
///
/// A backslash directly followed by a quote or comma is always an escape
/// prefix, since a literal backslash in front of either would itself have
/// been followed by the inserted prefix.
#[must_use]
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\'
            && let Some(&next @ ('"' | ',')) = chars.peek()
        {
            out.push(next);
            chars.next();
        } else {
            out.push(c);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn token_is_zero_padded() {
        assert_eq!(
            client_token(3),
            "msgpub-token-000000000003",
            "token should be zero padded to 12 digits"
        );
        assert_eq!(
            client_token(u32::MAX),
            "msgpub-token-004294967295",
            "maximum sequence number should fit"
        );
    }

    #[test]
    fn escape_quotes_and_commas() {
        assert_eq!(
            escape(r#"{"a":1,"b":"x"}"#),
            r#"{\"a\":1\,\"b\":\"x\"}"#,
            "escaped text should be correct"
        );
    }

    #[test]
    fn unescape_tricky_backslashes() {
        for text in [r#"a\"#, r#"\""#, r#"\\,"#, r#"\\\","#, "plain"] {
            assert_eq!(unescape(&escape(text)), text, "round trip should be exact");
        }
    }

    #[test]
    fn envelope_survives_escaping() -> Result<(), serde_json::Error> {
        let params = BTreeMap::from([
            ("door".to_string(), Value::from(1)),
            ("last_user".to_string(), Value::from("No.1, \"admin\"")),
            ("pm2_5".to_string(), Value::from(12.5)),
            ("light".to_string(), Value::from(true)),
        ]);
        let envelope = ReportEnvelope::new(7, &params);
        let escaped = envelope.to_escaped()?;

        assert!(
            !escaped.contains(",\""),
            "no unescaped argument delimiter should remain"
        );

        let decoded: serde_json::Value = serde_json::from_str(&unescape(&escaped))?;

        assert_eq!(
            decoded["clientToken"], "msgpub-token-000000000007",
            "token should be correct"
        );
        assert_eq!(decoded["method"], "report", "method should be correct");

        let params_back: BTreeMap<String, Value> =
            serde_json::from_value(decoded["params"].clone())?;

        assert_eq!(params_back, params, "params should round trip");

        Ok(())
    }

    #[test]
    fn decode_control() -> Result<(), serde_json::Error> {
        let msg: ControlMessage = serde_json::from_str(
            r#"{"method":"control","clientToken":"clientToken-L-0Okp05b","params":{"light":1}}"#,
        )?;

        assert_eq!(
            msg,
            ControlMessage::Control {
                client_token: "clientToken-L-0Okp05b".to_string(),
                params: BTreeMap::from([("light".to_string(), Value::Integer(1))]),
            },
            "control message should be decoded"
        );

        Ok(())
    }

    #[test]
    fn decode_report_reply() -> Result<(), serde_json::Error> {
        let msg: ControlMessage = serde_json::from_str(
            r#"{"method":"report_reply","clientToken":"msgpub-token-000000000003","code":0,"status":"success"}"#,
        )?;

        assert_eq!(
            msg,
            ControlMessage::ReportReply {
                client_token: "msgpub-token-000000000003".to_string(),
                code: 0,
                status: "success".to_string(),
            },
            "report reply should be decoded"
        );

        Ok(())
    }

    #[test]
    fn reject_unknown_method() {
        let res: Result<ControlMessage, _> =
            serde_json::from_str(r#"{"method":"delete","clientToken":"x"}"#);

        assert!(res.is_err(), "unknown method should not decode");
    }

    #[test]
    fn switch_values() {
        let on = vec![Value::Integer(1), Value::Bool(true)];
        let off = vec![Value::Integer(0), Value::Bool(false), Value::from("1")];

        assert!(on.iter().all(Value::is_on), "values should be on");
        assert!(!off.iter().any(Value::is_on), "values should be off");
    }
}
