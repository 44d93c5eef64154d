use async_trait::async_trait;
use relayd_core::config::SourceConfig;
use relayd_core::RawDescriptor;
use relayd_supervisor::collab::DesiredStateSource;
use relayd_supervisor::SourceError;
use serde::Deserialize;
use std::time::Duration;

/// Pulls the desired stream list from the configured HTTP endpoint.
///
/// The endpoint answers `{"data": [{"name", "source", "token"}, ...]}`.
pub struct HttpSource {
	client: reqwest::Client,
	url: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
	#[serde(default)]
	data: Vec<RawDescriptor>,
}

impl HttpSource {
	pub fn new(config: &SourceConfig) -> Result<Self, reqwest::Error> {
		let client = reqwest::Client::builder()
			.timeout(Duration::from_secs(config.timeout_secs))
			.build()?;
		Ok(Self {
			client,
			url: config.url.clone(),
		})
	}
}

pub fn parse_list(body: &str) -> Result<Vec<RawDescriptor>, SourceError> {
	serde_json::from_str::<ListResponse>(body)
		.map(|r| r.data)
		.map_err(|e| SourceError::Parse(e.to_string()))
}

#[async_trait]
impl DesiredStateSource for HttpSource {
	async fn fetch(&self) -> Result<Vec<RawDescriptor>, SourceError> {
		tracing::debug!(url = %self.url, "fetching desired state");
		let response = self
			.client
			.get(&self.url)
			.send()
			.await
			.map_err(|e| SourceError::Transport(e.to_string()))?;

		let status = response.status();
		if !status.is_success() {
			return Err(SourceError::Status(status.as_u16()));
		}
		let body = response
			.text()
			.await
			.map_err(|e| SourceError::Transport(e.to_string()))?;
		let list = parse_list(&body)?;
		tracing::debug!(count = list.len(), "fetched desired state");
		Ok(list)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_stream_list() {
		let body = r#"{"data":[
			{"name":"News","source":"rtmp://x/live","token":"abc"},
			{"source":"rtmp://y/live"}
		]}"#;
		let list = parse_list(body).unwrap();
		assert_eq!(list.len(), 2);
		assert_eq!(list[0].name.as_deref(), Some("News"));
		assert_eq!(list[1].name, None);
		assert_eq!(list[1].token, None);
	}

	#[test]
	fn missing_data_is_empty() {
		assert!(parse_list("{}").unwrap().is_empty());
	}

	#[test]
	fn garbage_is_a_parse_error() {
		assert!(matches!(parse_list("<html>"), Err(SourceError::Parse(_))));
	}
}
