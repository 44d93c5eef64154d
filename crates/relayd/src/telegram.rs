//! Telegram bot transport: outgoing notifications plus a long-poll loop that
//! answers operator commands.

use async_trait::async_trait;
use relayd_core::config::TelegramConfig;
use relayd_supervisor::collab::Notifier;
use relayd_supervisor::{Command, NotifyError, Supervisor};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const API_BASE: &str = "https://api.telegram.org";
const MAX_MESSAGE_CHARS: usize = 4000;
const POLL_TIMEOUT_SECS: u64 = 25;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

pub struct TelegramClient {
	client: reqwest::Client,
	base: String,
	chat_id: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
	ok: bool,
	#[serde(default)]
	description: Option<String>,
	result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
	update_id: i64,
	message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
	text: Option<String>,
	chat: Chat,
	from: Option<User>,
}

#[derive(Debug, Deserialize)]
struct Chat {
	id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
	id: i64,
}

/// A command message pulled out of an update batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
	pub chat_id: i64,
	pub requester: String,
	pub command: Command,
}

/// Commands found in one `getUpdates` batch and the offset that acknowledges it.
#[derive(Debug, Default)]
pub struct UpdateBatch {
	pub commands: Vec<Incoming>,
	pub next_offset: Option<i64>,
}

impl TelegramClient {
	/// Returns `None` unless both the bot token and chat id are set.
	pub fn from_config(config: &TelegramConfig) -> Result<Option<Self>, reqwest::Error> {
		let (Some(token), Some(chat_id)) = (&config.bot_token, &config.chat_id) else {
			return Ok(None);
		};
		if !config.is_configured() {
			return Ok(None);
		}
		let client = reqwest::Client::builder()
			.timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 15))
			.build()?;
		Ok(Some(Self {
			client,
			base: format!("{}/bot{}", API_BASE, token),
			chat_id: chat_id.clone(),
		}))
	}

	pub async fn send_to(&self, chat_id: &str, text: &str) -> Result<(), NotifyError> {
		for chunk in split_message(text, MAX_MESSAGE_CHARS) {
			let response = self
				.client
				.post(format!("{}/sendMessage", self.base))
				.form(&[
					("chat_id", chat_id),
					("text", chunk.as_str()),
					("parse_mode", "HTML"),
					("disable_web_page_preview", "true"),
				])
				.send()
				.await
				.map_err(|e| NotifyError::Transport(e.to_string()))?;
			let body = response
				.text()
				.await
				.map_err(|e| NotifyError::Transport(e.to_string()))?;
			let envelope: Envelope<serde_json::Value> =
				serde_json::from_str(&body).map_err(|e| NotifyError::Rejected(e.to_string()))?;
			if !envelope.ok {
				return Err(NotifyError::Rejected(
					envelope.description.unwrap_or_else(|| "unknown error".into()),
				));
			}
		}
		Ok(())
	}

	async fn get_updates(&self, offset: Option<i64>) -> Result<UpdateBatch, NotifyError> {
		let mut query = vec![("timeout", POLL_TIMEOUT_SECS.to_string())];
		if let Some(offset) = offset {
			query.push(("offset", offset.to_string()));
		}
		let body = self
			.client
			.get(format!("{}/getUpdates", self.base))
			.query(&query)
			.send()
			.await
			.map_err(|e| NotifyError::Transport(e.to_string()))?
			.text()
			.await
			.map_err(|e| NotifyError::Transport(e.to_string()))?;
		parse_updates(&body)
	}
}

#[async_trait]
impl Notifier for TelegramClient {
	async fn notify(&self, text: &str) -> Result<(), NotifyError> {
		self.send_to(&self.chat_id, text).await
	}
}

pub fn parse_updates(body: &str) -> Result<UpdateBatch, NotifyError> {
	let envelope: Envelope<Vec<Update>> =
		serde_json::from_str(body).map_err(|e| NotifyError::Rejected(e.to_string()))?;
	if !envelope.ok {
		return Err(NotifyError::Rejected(
			envelope.description.unwrap_or_else(|| "getUpdates failed".into()),
		));
	}

	let updates = envelope.result.unwrap_or_default();
	let next_offset = updates.iter().map(|u| u.update_id).max().map(|id| id + 1);
	let commands = updates
		.into_iter()
		.filter_map(|u| u.message)
		.filter_map(|m| {
			let command = Command::parse(m.text.as_deref()?)?;
			let requester = m.from.map(|u| u.id).unwrap_or(m.chat.id);
			Some(Incoming {
				chat_id: m.chat.id,
				requester: requester.to_string(),
				command,
			})
		})
		.collect();

	Ok(UpdateBatch { commands, next_offset })
}

/// Splits on line boundaries so no chunk exceeds `limit` characters.
/// A single overlong line is cut hard.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
	let mut chunks = Vec::new();
	let mut current = String::new();
	let mut current_len = 0;

	for line in text.split_inclusive('\n') {
		let len = line.chars().count();
		if current_len + len > limit && !current.is_empty() {
			chunks.push(std::mem::take(&mut current));
			current_len = 0;
		}
		if len > limit {
			let chars: Vec<char> = line.chars().collect();
			for piece in chars.chunks(limit) {
				chunks.push(piece.iter().collect());
			}
			continue;
		}
		current.push_str(line);
		current_len += len;
	}
	if !current.is_empty() || chunks.is_empty() {
		chunks.push(current);
	}
	chunks
}

/// Answers `/info`, `/status` and `/help` until the supervisor shuts down.
pub async fn run_command_poller(client: Arc<TelegramClient>, sup: Arc<Supervisor>) {
	tracing::info!("telegram command polling started");
	let mut offset = None;

	loop {
		let batch = tokio::select! {
			_ = sup.wait_for_shutdown() => break,
			batch = client.get_updates(offset) => batch,
		};

		let batch = match batch {
			Ok(b) => b,
			Err(e) => {
				tracing::warn!("telegram poll failed: {}", e);
				tokio::select! {
					_ = sup.wait_for_shutdown() => break,
					_ = tokio::time::sleep(POLL_ERROR_BACKOFF) => continue,
				}
			}
		};

		if batch.next_offset.is_some() {
			offset = batch.next_offset;
		}

		for incoming in batch.commands {
			tracing::info!(
				requester = %incoming.requester,
				command = incoming.command.name(),
				"telegram command"
			);
			let reply = sup.answer(&incoming.requester, incoming.command).await;
			if let Err(e) = client.send_to(&incoming.chat_id.to_string(), &reply).await {
				tracing::warn!("failed to answer {}: {}", incoming.requester, e);
			}
		}
	}
	tracing::info!("telegram command polling stopped");
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_commands_and_offset() {
		let body = r#"{"ok":true,"result":[
			{"update_id":10,"message":{"text":"/status","chat":{"id":-100},"from":{"id":42}}},
			{"update_id":11,"message":{"text":"hello","chat":{"id":-100},"from":{"id":42}}},
			{"update_id":12,"edited_message":{"text":"/info","chat":{"id":-100}}},
			{"update_id":13,"message":{"text":"/info@relay_bot","chat":{"id":7}}}
		]}"#;
		let batch = parse_updates(body).unwrap();
		assert_eq!(batch.next_offset, Some(14));
		assert_eq!(
			batch.commands,
			vec![
				Incoming { chat_id: -100, requester: "42".into(), command: Command::Status },
				Incoming { chat_id: 7, requester: "7".into(), command: Command::Info },
			]
		);
	}

	#[test]
	fn empty_batch_keeps_offset() {
		let batch = parse_updates(r#"{"ok":true,"result":[]}"#).unwrap();
		assert!(batch.commands.is_empty());
		assert_eq!(batch.next_offset, None);
	}

	#[test]
	fn api_failure_is_rejected() {
		let body = r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#;
		match parse_updates(body) {
			Err(NotifyError::Rejected(msg)) => assert_eq!(msg, "Unauthorized"),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn split_keeps_short_messages_whole() {
		assert_eq!(split_message("one\ntwo", 100), vec!["one\ntwo".to_string()]);
		assert_eq!(split_message("", 100), vec![String::new()]);
	}

	#[test]
	fn split_breaks_on_lines() {
		let chunks = split_message("aaaa\nbbbb\ncccc", 10);
		assert_eq!(chunks, vec!["aaaa\nbbbb\n".to_string(), "cccc".to_string()]);
		assert!(chunks.iter().all(|c| c.chars().count() <= 10));
	}

	#[test]
	fn split_cuts_overlong_lines() {
		let chunks = split_message("abcdefghij", 4);
		assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
	}

	#[test]
	fn unconfigured_client_is_none() {
		let config = TelegramConfig::default();
		assert!(TelegramClient::from_config(&config).unwrap().is_none());
	}
}
