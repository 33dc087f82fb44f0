//! JSON-lines framing between the JavaScript host and the bridge.

use carrier_core::{CommandError, EventRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub callback_id: i64,
    pub command: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// A line that could not be turned into a request. Answerable when it carried a callback id.
#[derive(Debug, Clone, PartialEq)]
pub struct BadRequest {
    pub callback_id: Option<i64>,
    pub message: String,
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, BadRequest> {
        let v: Value = serde_json::from_str(line).map_err(|e| BadRequest {
            callback_id: None,
            message: format!("invalid request: {e}"),
        })?;
        let callback_id = v.get("callbackId").and_then(Value::as_i64);
        serde_json::from_value(v).map_err(|e| BadRequest {
            callback_id,
            message: format!("invalid request: {e}"),
        })
    }
}

/// One stdout line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outgoing {
    Ok {
        #[serde(rename = "callbackId")]
        callback_id: i64,
        ok: Value,
    },
    Error {
        #[serde(rename = "callbackId")]
        callback_id: i64,
        error: String,
    },
    Event { event: EventRecord },
}

impl Outgoing {
    pub fn reply(callback_id: i64, result: Result<Value, CommandError>) -> Self {
        match result {
            Ok(ok) => Outgoing::Ok { callback_id, ok },
            Err(e) => Outgoing::Error {
                callback_id,
                error: e.to_string(),
            },
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"cannot encode output: {e}"}}"#))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_request() {
        let r = Request::parse(r#"{"callbackId":4,"command":"carrierStart","args":[1,1000]}"#).unwrap();
        assert_eq!(r.callback_id, 4);
        assert_eq!(r.command, "carrierStart");
        assert_eq!(r.args, vec![json!(1), json!(1000)]);

        let r = Request::parse(r#"{"callbackId":5,"command":"getVersion"}"#).unwrap();
        assert!(r.args.is_empty());
    }

    #[test]
    fn bad_request_keeps_callback_id() {
        let e = Request::parse(r#"{"callbackId":9,"args":[]}"#).unwrap_err();
        assert_eq!(e.callback_id, Some(9));
        assert!(e.message.starts_with("invalid request"));

        let e = Request::parse("not json").unwrap_err();
        assert_eq!(e.callback_id, None);
    }

    #[test]
    fn output_lines() {
        let ok = Outgoing::Ok {
            callback_id: 1,
            ok: json!({"isReady": true}),
        };
        assert_eq!(ok.to_line(), r#"{"callbackId":1,"ok":{"isReady":true}}"#);
        let err = Outgoing::Error {
            callback_id: 2,
            error: "Id invalid!".into(),
        };
        assert_eq!(err.to_line(), r#"{"callbackId":2,"error":"Id invalid!"}"#);
    }
}
