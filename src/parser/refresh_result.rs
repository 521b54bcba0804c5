use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::error::CacheError;

/// A well-formed answer from a refresh operation.
///
/// Serializes back into the exact shape it was recognised from, so refresh
/// operations may build one and hand it over as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RefreshResult {
    /// `{accessToken, expiresIn}`
    AccessToken {
        #[serde(rename = "accessToken")]
        access_token: String,
        #[serde(rename = "expiresIn")]
        expires_in: i64,
    },
    /// `{access_token, expires_in}`
    SnakeCaseAccessToken { access_token: String, expires_in: i64 },
    /// `{ticket, expires_in}`
    Ticket { ticket: String, expires_in: i64 },
}

impl RefreshResult {
    pub fn value(&self) -> &str {
        match self {
            RefreshResult::AccessToken { access_token, .. } => access_token,
            RefreshResult::SnakeCaseAccessToken { access_token, .. } => access_token,
            RefreshResult::Ticket { ticket, .. } => ticket,
        }
    }

    /// Authority-declared remaining lifetime in seconds.
    pub fn expires_in(&self) -> i64 {
        match self {
            RefreshResult::AccessToken { expires_in, .. }
            | RefreshResult::SnakeCaseAccessToken { expires_in, .. }
            | RefreshResult::Ticket { expires_in, .. } => *expires_in,
        }
    }

    pub fn into_parts(self) -> (String, i64) {
        match self {
            RefreshResult::AccessToken { access_token, expires_in } => (access_token, expires_in),
            RefreshResult::SnakeCaseAccessToken { access_token, expires_in } => {
                (access_token, expires_in)
            }
            RefreshResult::Ticket { ticket, expires_in } => (ticket, expires_in),
        }
    }

    pub fn to_json(&self) -> Value {
        // untagged enums of plain strings and integers always serialize
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CamelCaseShape {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct SnakeCaseShape {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct TicketShape {
    ticket: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct ErrorShape {
    errcode: i64,
    #[serde(default)]
    errmsg: Option<String>,
}

/// Classify a refresh payload.
///
/// A non-zero `errcode` marks an authority-side failure. Otherwise exactly
/// one recognised shape must match.
pub fn parse_refresh_result(
    credential: &str,
    payload: &Value,
) -> Result<RefreshResult, CacheError> {
    if let Some(failure) = try_shape::<ErrorShape>(payload).filter(|f| f.errcode != 0) {
        warn!(credential = %credential, errcode = failure.errcode, "authority rejected refresh");
        return Err(CacheError::UpstreamRefreshFailed {
            credential: credential.to_owned(),
            reason: format!(
                "errcode {}: {}",
                failure.errcode,
                failure.errmsg.unwrap_or_default()
            ),
        });
    }

    let mut matches = Vec::with_capacity(1);
    if let Some(s) = try_shape::<CamelCaseShape>(payload) {
        matches.push(RefreshResult::AccessToken {
            access_token: s.access_token,
            expires_in: s.expires_in,
        });
    }
    if let Some(s) = try_shape::<SnakeCaseShape>(payload) {
        matches.push(RefreshResult::SnakeCaseAccessToken {
            access_token: s.access_token,
            expires_in: s.expires_in,
        });
    }
    if let Some(s) = try_shape::<TicketShape>(payload) {
        matches.push(RefreshResult::Ticket { ticket: s.ticket, expires_in: s.expires_in });
    }

    match matches.len() {
        1 => Ok(matches.remove(0)),
        n => {
            debug!(credential = %credential, matched = n, "refresh payload matched {} shapes", n);
            Err(CacheError::MalformedRefreshResult {
                credential: credential.to_owned(),
                payload: describe_shape(payload),
            })
        }
    }
}

fn try_shape<T: DeserializeOwned>(payload: &Value) -> Option<T> {
    T::deserialize(payload).ok()
}

/// Field names only; values may be secrets.
fn describe_shape(payload: &Value) -> String {
    match payload {
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            format!("object with fields [{}]", keys.join(", "))
        }
        Value::Null => "null".to_owned(),
        Value::Bool(_) => "boolean".to_owned(),
        Value::Number(_) => "number".to_owned(),
        Value::String(_) => "string".to_owned(),
        Value::Array(_) => "array".to_owned(),
    }
}
