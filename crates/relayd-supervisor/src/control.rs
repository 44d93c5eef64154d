//! Read-only operator commands and the per-requester rate limit that guards
//! them. Transports (chat bot, local socket, HTTP) parse their input into a
//! [`Command`] and ask the [`Supervisor`](crate::Supervisor) for the answer.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
	Info,
	Status,
	Help,
}

impl Command {
	/// Parses chat-style input. Matches by prefix, so `/status now` and
	/// `/info@relay_bot` both work. Anything else is not a command.
	pub fn parse(text: &str) -> Option<Self> {
		let text = text.trim();
		if text.starts_with("/info") {
			Some(Command::Info)
		} else if text.starts_with("/status") {
			Some(Command::Status)
		} else if text.starts_with("/help") {
			Some(Command::Help)
		} else {
			None
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			Command::Info => "info",
			Command::Status => "status",
			Command::Help => "help",
		}
	}

	pub fn from_name(name: &str) -> Option<Self> {
		match name {
			"info" => Some(Command::Info),
			"status" => Some(Command::Status),
			"help" => Some(Command::Help),
			_ => None,
		}
	}
}

const MAX_REQUESTERS: usize = 100;
const TRIM_TO: usize = 80;

/// One command per requester per window.
#[derive(Debug)]
pub struct RateLimiter<K> {
	window: Duration,
	last_seen: HashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> RateLimiter<K> {
	pub fn new(window: Duration) -> Self {
		Self {
			window,
			last_seen: HashMap::new(),
		}
	}

	/// Records a request from `who`. On refusal returns the reply to send back.
	pub fn check(&mut self, who: &K) -> Result<(), String> {
		let now = Instant::now();
		if let Some(last) = self.last_seen.get(who) {
			let since = now.saturating_duration_since(*last);
			if since < self.window {
				return Err(format!(
					"Please wait {} seconds between commands.",
					self.window.as_secs()
				));
			}
		}
		self.last_seen.insert(who.clone(), now);
		if self.last_seen.len() > MAX_REQUESTERS {
			self.trim();
		}
		Ok(())
	}

	/// Keeps the most recent requesters only.
	fn trim(&mut self) {
		let mut entries: Vec<(K, Instant)> = self.last_seen.drain().collect();
		entries.sort_by(|a, b| b.1.cmp(&a.1));
		entries.truncate(TRIM_TO);
		self.last_seen = entries.into_iter().collect();
	}

	pub fn len(&self) -> usize {
		self.last_seen.len()
	}

	pub fn is_empty(&self) -> bool {
		self.last_seen.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_commands_by_prefix() {
		assert_eq!(Command::parse("/info"), Some(Command::Info));
		assert_eq!(Command::parse(" /status please"), Some(Command::Status));
		assert_eq!(Command::parse("/help@relay_bot"), Some(Command::Help));
		assert_eq!(Command::parse("hello"), None);
		assert_eq!(Command::parse("/start"), None);
		assert_eq!(Command::from_name(Command::Info.name()), Some(Command::Info));
	}

	#[tokio::test(start_paused = true)]
	async fn limits_each_requester() {
		let mut limiter = RateLimiter::new(Duration::from_secs(5));
		assert!(limiter.check(&1u64).is_ok());
		assert_eq!(
			limiter.check(&1u64),
			Err("Please wait 5 seconds between commands.".to_string())
		);
		assert!(limiter.check(&2u64).is_ok());

		tokio::time::advance(Duration::from_secs(5)).await;
		assert!(limiter.check(&1u64).is_ok());
	}

	#[tokio::test(start_paused = true)]
	async fn trims_oldest_requesters() {
		let mut limiter = RateLimiter::new(Duration::from_secs(5));
		for who in 0..=100u64 {
			limiter.check(&who).unwrap();
			tokio::time::advance(Duration::from_millis(10)).await;
		}
		assert_eq!(limiter.len(), 80);
		// The earliest requesters were forgotten, the latest are still limited.
		assert!(limiter.check(&0u64).is_ok());
		assert!(limiter.check(&100u64).is_err());
	}
}
