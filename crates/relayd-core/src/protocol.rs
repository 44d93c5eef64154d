use crate::types::StreamStatus;
use serde::{Deserialize, Serialize};

/// Requests accepted on the local control socket. All are read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
	Info,
	Status,
	Help,
	Streams,
	Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
	Text { text: String },
	Streams { streams: Vec<StreamStatus> },
	Error { message: String },
	Pong,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_wire_format() {
		let json = serde_json::to_string(&Request::Info).unwrap();
		assert_eq!(json, r#"{"cmd":"info"}"#);
		let parsed: Request = serde_json::from_str(r#"{"cmd":"streams"}"#).unwrap();
		assert!(matches!(parsed, Request::Streams));
	}

	#[test]
	fn response_wire_format() {
		let json = serde_json::to_string(&Response::Text { text: "hi".into() }).unwrap();
		assert_eq!(json, r#"{"type":"text","text":"hi"}"#);
	}
}
