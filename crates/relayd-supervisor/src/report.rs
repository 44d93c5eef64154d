//! Operator-facing text. Everything here renders Telegram-flavoured HTML
//! (`<b>`, `<i>`, `<code>`), which also reads fine as plain text.

use chrono::Local;
use relayd_core::config::TimingConfig;
use relayd_core::{format_uptime, CredentialRecord, StreamDescriptor, StreamStatus};
use std::time::Duration;

/// Streams listed by the detailed report before it switches to a count.
const INFO_STREAM_LIMIT: usize = 5;
/// Characters of relay stderr carried into a crash report.
const CRASH_TAIL_CHARS: usize = 300;

/// Everything the on-demand reports need from the supervisor.
pub struct FleetView<'a> {
	pub uptime: Duration,
	pub timing: &'a TimingConfig,
	pub poll_interval: Duration,
	pub streams: &'a [StreamStatus],
	pub desired: usize,
	pub cached: usize,
}

impl FleetView<'_> {
	fn active(&self) -> usize {
		self.streams.iter().filter(|s| s.is_active()).count()
	}
}

pub fn escape_html(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	for c in text.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			_ => out.push(c),
		}
	}
	out
}

fn secs(d: Duration) -> String {
	format!("{}s", d.as_secs())
}

fn hours(d: Duration) -> String {
	let h = d.as_secs_f64() / 3600.0;
	if h.fract() == 0.0 {
		format!("{}h", h as u64)
	} else {
		format!("{:.2}h", h)
	}
}

fn now() -> String {
	Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn tail_chars(text: &str, limit: usize) -> &str {
	let count = text.chars().count();
	if count <= limit {
		return text;
	}
	let skip = count - limit;
	match text.char_indices().nth(skip) {
		Some((idx, _)) => &text[idx..],
		None => text,
	}
}

pub fn startup_message(desired: usize, cached: usize, timing: &TimingConfig) -> String {
	format!(
		"🚀 <b>Stream Manager Started</b>\n\n\
		 Total items: {}\n\
		 Cached streams: {}\n\
		 ⏳ All streams will start in {}\n\
		 🆕 New stream delay: {}\n\
		 🔧 Crashed stream delay: {}\n\
		 🔄 Auto-rotation: {}\n\
		 Bot commands: /info /status /help",
		desired,
		cached,
		secs(timing.initial_delay()),
		secs(timing.new_stream_delay()),
		secs(timing.crash_delay()),
		hours(timing.rotation_interval()),
	)
}

pub fn crash_report(
	desc: &StreamDescriptor,
	reason: &str,
	stderr_tail: &str,
	uptime: Option<Duration>,
	restart_delay: Duration,
) -> String {
	let uptime = uptime.map(format_uptime).unwrap_or_else(|| "Unknown".to_string());
	let mut text = format!(
		"🔴 <b>STREAM CRASH REPORT</b>\n\n\
		 <b>{}</b>\n\
		 ID: {}\n\
		 Reason: {}\n\
		 Uptime: {}\n\
		 Status: Will restart in {}",
		escape_html(&desc.name),
		desc.id,
		escape_html(reason),
		uptime,
		secs(restart_delay),
	);
	let tail = tail_chars(stderr_tail.trim(), CRASH_TAIL_CHARS);
	if !tail.is_empty() {
		text.push_str(&format!("\n\n<code>{}</code>", escape_html(tail)));
	}
	text
}

pub fn rotation_report(desc: &StreamDescriptor, record: &CredentialRecord, start_delay: Duration) -> String {
	format!(
		"🔄 <b>STREAM KEY ROTATED</b>\n\n\
		 <b>{}</b>\n\
		 ID: {}\n\
		 Old key: Removed\n\
		 New key: Generated\n\
		 DASH URL: <code>{}</code>\n\
		 Status: Will start in {}",
		escape_html(&desc.name),
		desc.id,
		escape_html(&record.preview_url),
		secs(start_delay),
	)
}

pub fn rotation_failed(desc: &StreamDescriptor, error: &str, retry: Duration) -> String {
	format!(
		"⚠️ <b>KEY ROTATION FAILED</b>\n\n\
		 <b>{}</b>\n\
		 ID: {}\n\
		 Error: {}\n\
		 Status: Will retry in {}",
		escape_html(&desc.name),
		desc.id,
		escape_html(error),
		secs(retry),
	)
}

pub fn provisioning_failed(desc: &StreamDescriptor, error: &str, retry: Duration) -> String {
	format!(
		"⚠️ <b>PROVISIONING FAILED</b>\n\n\
		 <b>{}</b>\n\
		 ID: {}\n\
		 Error: {}\n\
		 Status: Will retry in {}",
		escape_html(&desc.name),
		desc.id,
		escape_html(error),
		secs(retry),
	)
}

pub fn stream_removed(desc: &StreamDescriptor) -> String {
	format!(
		"❌ <b>STREAM REMOVED</b>\n\n<b>{}</b>\nID: {}",
		escape_html(&desc.name),
		desc.id
	)
}

pub fn shutdown_message(active: usize) -> String {
	format!(
		"🛑 <b>Stream Manager Shutting Down</b>\n\
		 Stopping {} active streams\n\
		 Cleaning up all timers",
		active
	)
}

/// One-shot summary sent a while after boot. `streams` should hold every
/// stream that has a cached credential.
pub fn dash_report(streams: &[StreamStatus]) -> String {
	if !streams.iter().any(|s| s.is_active()) {
		return "⚠️ <b>No active streams detected</b>\nSystem is running but no streams are active."
			.to_string();
	}

	let blocks: Vec<String> = streams
		.iter()
		.map(|s| {
			format!(
				"<b>{}</b>\nID: {}\nStatus: {}\nDASH: <code>{}</code>\nUptime: {}",
				escape_html(&s.name),
				s.id,
				s.state,
				escape_html(s.preview_url.as_deref().unwrap_or("N/A")),
				uptime_label(s),
			)
		})
		.collect();
	format!("📡 <b>DASH REPORT</b>\n\n{}", blocks.join("\n\n"))
}

fn uptime_label(status: &StreamStatus) -> String {
	match status.uptime_secs {
		Some(secs) => format_uptime(Duration::from_secs(secs)),
		None => "Not started".to_string(),
	}
}

pub fn info_report(view: &FleetView<'_>) -> String {
	let host = host_info();
	let mut report = format!("📊 <b>SYSTEM STATUS REPORT</b>\n⏰ <i>{}</i>\n\n", now());

	report.push_str("🖥️ <b>Server Info:</b>\n");
	report.push_str(&format!("• Host: {}\n", escape_html(&host.hostname)));
	report.push_str(&format!("• Platform: {}\n", host.platform));
	report.push_str(&format!("• Supervisor Uptime: {}\n", format_uptime(view.uptime)));
	report.push_str(&format!("• Memory: {}\n", host.memory));
	report.push_str(&format!("• Initial Delay: {}\n", secs(view.timing.initial_delay())));
	report.push_str(&format!("• New Stream Delay: {}\n", secs(view.timing.new_stream_delay())));
	report.push_str(&format!("• Crashed Stream Delay: {}\n", secs(view.timing.crash_delay())));
	report.push_str(&format!("• Rotation: {}\n\n", hours(view.timing.rotation_interval())));

	report.push_str("📡 <b>Stream Stats:</b>\n");
	report.push_str(&format!("• Active: {}\n", view.active()));
	report.push_str(&format!("• Total: {}\n", view.desired));
	report.push_str(&format!("• Cached: {}\n\n", view.cached));

	report.push_str("🎬 <b>Stream Status:</b>\n");
	if view.streams.is_empty() {
		report.push_str("\nNo streams configured.\n");
	}
	for s in view.streams.iter().take(INFO_STREAM_LIMIT) {
		report.push_str(&format!("\n<b>{}</b>\n", escape_html(&s.name)));
		report.push_str(&format!("• ID: {}\n", s.id));
		report.push_str(&format!("• Status: {}\n", s.state));
		report.push_str(&format!("• Active: {}\n", if s.is_active() { "🟢" } else { "🔴" }));
		report.push_str(&format!("• Uptime: {}\n", uptime_label(s)));
		report.push_str(&format!(
			"• DASH: <code>{}</code>\n",
			escape_html(s.preview_url.as_deref().unwrap_or("N/A"))
		));
	}
	if view.streams.len() > INFO_STREAM_LIMIT {
		report.push_str(&format!(
			"\n... and {} more streams",
			view.streams.len() - INFO_STREAM_LIMIT
		));
	}

	report.push_str(&format!(
		"\n\n🔄 <i>Last checked: {}</i>",
		Local::now().format("%H:%M:%S")
	));
	report
}

pub fn status_summary(view: &FleetView<'_>) -> String {
	format!(
		"📊 <b>Stream Manager Status</b>\n\n\
		 🟢 Active Streams: {}\n\
		 📋 Total Items: {}\n\
		 ⏰ Supervisor Uptime: {}\n\
		 🆕 New Stream Delay: {}\n\
		 🔧 Crashed Stream Delay: {}\n\
		 ⏳ Rotation: {}\n\
		 🕒 Time: {}\n\n\
		 Use /info for detailed report",
		view.active(),
		view.desired,
		format_uptime(view.uptime),
		secs(view.timing.new_stream_delay()),
		secs(view.timing.crash_delay()),
		hours(view.timing.rotation_interval()),
		now(),
	)
}

pub fn help_text(timing: &TimingConfig, poll_interval: Duration) -> String {
	format!(
		"🤖 <b>Stream Manager Bot Commands</b>\n\n\
		 /info - Get detailed system and stream report\n\
		 /status - Quick status check\n\
		 /help - Show this help message\n\n\
		 <i>Auto-monitoring {} intervals</i>\n\
		 <i>New stream delay: {}</i>\n\
		 <i>Crashed stream delay: {}</i>\n\
		 <i>Rotation interval: {}</i>",
		secs(poll_interval),
		secs(timing.new_stream_delay()),
		secs(timing.crash_delay()),
		hours(timing.rotation_interval()),
	)
}

struct HostInfo {
	hostname: String,
	platform: String,
	memory: String,
}

fn host_info() -> HostInfo {
	let hostname = nix::unistd::gethostname()
		.ok()
		.and_then(|h| h.into_string().ok())
		.unwrap_or_else(|| "unknown".to_string());
	let memory = memory_usage()
		.map(|(used, total)| format!("{}MB / {}MB", used, total))
		.unwrap_or_else(|| "unavailable".to_string());
	HostInfo {
		hostname,
		platform: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
		memory,
	}
}

/// Used and total memory in MiB, from `/proc/meminfo`.
fn memory_usage() -> Option<(u64, u64)> {
	let content = std::fs::read_to_string("/proc/meminfo").ok()?;
	parse_meminfo(&content)
}

fn parse_meminfo(content: &str) -> Option<(u64, u64)> {
	let field = |name: &str| -> Option<u64> {
		content
			.lines()
			.find(|l| l.starts_with(name))?
			.split_whitespace()
			.nth(1)?
			.parse()
			.ok()
	};
	let total = field("MemTotal:")?;
	let available = field("MemAvailable:")?;
	Some((total.saturating_sub(available) / 1024, total / 1024))
}

#[cfg(test)]
mod tests {
	use super::*;
	use relayd_core::{StreamId, StreamState};

	fn status(name: &str, state: StreamState, uptime: Option<u64>) -> StreamStatus {
		StreamStatus {
			id: StreamId::derive(name, "rtmp://x"),
			name: name.to_string(),
			state,
			pid: None,
			uptime_secs: uptime,
			preview_url: Some("https://dash/x".into()),
			crashes: 0,
			rotations: 0,
			last_exit: None,
		}
	}

	#[test]
	fn crash_report_contents() {
		let desc = StreamDescriptor::new("News <HD>", "rtmp://x", "t");
		let text = crash_report(
			&desc,
			"exited with code 1",
			"Connection refused",
			Some(Duration::from_secs(61)),
			Duration::from_secs(120),
		);
		assert!(text.contains("News &lt;HD&gt;"));
		assert!(text.contains("Uptime: 1m 1s"));
		assert!(text.contains("Will restart in 120s"));
		assert!(text.contains("Connection refused"));
	}

	#[test]
	fn provisioning_failure_names_the_retry() {
		let desc = StreamDescriptor::new("a", "rtmp://x", "t");
		let text = provisioning_failed(&desc, "token expired", Duration::from_secs(300));
		assert!(text.contains("PROVISIONING FAILED"));
		assert!(text.contains("token expired"));
		assert!(text.contains("300s"));
	}

	#[test]
	fn tail_is_truncated_from_the_front() {
		let long = "x".repeat(1000) + "END";
		let tail = tail_chars(&long, 10);
		assert_eq!(tail.chars().count(), 10);
		assert!(tail.ends_with("END"));
	}

	#[test]
	fn dash_report_without_active_streams() {
		let streams = vec![status("a", StreamState::Restarting, None)];
		assert!(dash_report(&streams).contains("No active streams detected"));
	}

	#[test]
	fn dash_report_lists_every_stream() {
		let streams = vec![
			status("a", StreamState::Running, Some(3600)),
			status("b", StreamState::Failed, None),
		];
		let text = dash_report(&streams);
		assert!(text.contains("<b>a</b>"));
		assert!(text.contains("Uptime: 1h"));
		assert!(text.contains("<b>b</b>"));
		assert!(text.contains("Uptime: Not started"));
	}

	#[test]
	fn info_report_caps_stream_list() {
		let timing = TimingConfig::default();
		let streams: Vec<StreamStatus> = (0..7)
			.map(|n| status(&format!("s{}", n), StreamState::Running, Some(5)))
			.collect();
		let view = FleetView {
			uptime: Duration::from_secs(10),
			timing: &timing,
			poll_interval: Duration::from_secs(20),
			streams: &streams,
			desired: 7,
			cached: 7,
		};
		let text = info_report(&view);
		assert!(text.contains("• Active: 7"));
		assert!(text.contains("<b>s4</b>"));
		assert!(!text.contains("<b>s5</b>"));
		assert!(text.contains("... and 2 more streams"));
	}

	#[test]
	fn help_mentions_intervals() {
		let timing = TimingConfig::default();
		let text = help_text(&timing, Duration::from_secs(20));
		assert!(text.contains("/status"));
		assert!(text.contains("Auto-monitoring 20s intervals"));
		assert!(text.contains("Rotation interval: 3.75h"));
	}

	#[test]
	fn meminfo_parsing() {
		let sample = "MemTotal:        2048000 kB\nMemFree:  100 kB\nMemAvailable:    1024000 kB\n";
		assert_eq!(parse_meminfo(sample), Some((1000, 2000)));
		assert_eq!(parse_meminfo("garbage"), None);
	}
}
