//! Destination provisioning against the Graph live-video API.

use async_trait::async_trait;
use relayd_core::config::ProvisioningConfig;
use relayd_supervisor::collab::{DestinationProvisioner, Resolution};
use relayd_supervisor::ProvisionError;
use serde::Deserialize;
use std::time::Duration;

pub struct GraphProvisioner {
	client: reqwest::Client,
	api_base: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
	message: String,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
	id: Option<String>,
	error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct LiveVideoResponse {
	stream_url: Option<String>,
	secure_stream_url: Option<String>,
	dash_preview_url: Option<String>,
	status: Option<String>,
	error: Option<ApiError>,
}

impl GraphProvisioner {
	pub fn new(config: &ProvisioningConfig) -> Result<Self, reqwest::Error> {
		let client = reqwest::Client::builder()
			.timeout(Duration::from_secs(config.request_timeout_secs))
			.build()?;
		Ok(Self {
			client,
			api_base: config.api_base.trim_end_matches('/').to_string(),
		})
	}
}

fn transport(e: reqwest::Error) -> ProvisionError {
	ProvisionError::Transport(e.to_string())
}

pub fn parse_create(body: &str) -> Result<String, ProvisionError> {
	let parsed: CreateResponse =
		serde_json::from_str(body).map_err(|e| ProvisionError::Parse(e.to_string()))?;
	if let Some(err) = parsed.error {
		return Err(ProvisionError::Api(err.message));
	}
	parsed
		.id
		.filter(|id| !id.is_empty())
		.ok_or_else(|| ProvisionError::Parse("response has no live video id".into()))
}

pub fn parse_live_video(body: &str) -> Result<Resolution, ProvisionError> {
	let parsed: LiveVideoResponse =
		serde_json::from_str(body).map_err(|e| ProvisionError::Parse(e.to_string()))?;
	if let Some(err) = parsed.error {
		return Err(ProvisionError::Api(err.message));
	}
	Ok(Resolution {
		destination_url: parsed.secure_stream_url.or(parsed.stream_url),
		preview_url: parsed.dash_preview_url,
		status: parsed.status,
	})
}

#[async_trait]
impl DestinationProvisioner for GraphProvisioner {
	async fn create_destination(&self, name: &str, credential: &str) -> Result<String, ProvisionError> {
		tracing::info!(%name, "creating live video");
		let response = self
			.client
			.post(format!("{}/me/live_videos", self.api_base))
			.form(&[
				("title", name),
				("status", "UNPUBLISHED"),
				("access_token", credential),
			])
			.send()
			.await
			.map_err(transport)?;
		let body = response.text().await.map_err(transport)?;
		let id = parse_create(&body)?;
		tracing::info!(%name, live_id = %id, "live video created");
		Ok(id)
	}

	async fn resolve_destination(
		&self,
		live_handle: &str,
		credential: &str,
	) -> Result<Resolution, ProvisionError> {
		let response = self
			.client
			.get(format!("{}/{}", self.api_base, live_handle))
			.query(&[
				("fields", "stream_url,secure_stream_url,dash_preview_url,status"),
				("access_token", credential),
			])
			.send()
			.await
			.map_err(transport)?;

		let status = response.status();
		let body = response.text().await.map_err(transport)?;
		if status.is_server_error() {
			return Err(ProvisionError::Transport(format!("status {}", status.as_u16())));
		}
		parse_live_video(&body)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn create_returns_id() {
		assert_eq!(parse_create(r#"{"id":"1234"}"#).unwrap(), "1234");
	}

	#[test]
	fn create_surfaces_api_errors() {
		let body = r#"{"error":{"message":"Invalid OAuth access token.","code":190}}"#;
		match parse_create(body) {
			Err(ProvisionError::Api(message)) => assert_eq!(message, "Invalid OAuth access token."),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn live_video_prefers_secure_url() {
		let body = r#"{
			"stream_url":"rtmp://live-api/rtmp/key",
			"secure_stream_url":"rtmps://live-api-s/rtmp/key",
			"dash_preview_url":"https://dash/preview.mpd",
			"status":"UNPUBLISHED",
			"id":"1234"
		}"#;
		let r = parse_live_video(body).unwrap();
		assert_eq!(r.destination_url.as_deref(), Some("rtmps://live-api-s/rtmp/key"));
		assert_eq!(r.preview_url.as_deref(), Some("https://dash/preview.mpd"));
		assert_eq!(r.status.as_deref(), Some("UNPUBLISHED"));
	}

	#[test]
	fn pending_live_video_has_no_url() {
		let r = parse_live_video(r#"{"status":"PREVIEW","id":"1"}"#).unwrap();
		assert!(r.destination_url.is_none());
	}
}
