use owo_colors::OwoColorize;
use relayd_core::{StreamState, StreamStatus};

pub fn compact_uptime(secs: u64) -> String {
	if secs < 60 {
		format!("{}s", secs)
	} else if secs < 3600 {
		let m = secs / 60;
		let s = secs % 60;
		if s == 0 { format!("{}m", m) } else { format!("{}m{}s", m, s) }
	} else if secs < 86400 {
		let h = secs / 3600;
		let m = (secs % 3600) / 60;
		if m == 0 { format!("{}h", h) } else { format!("{}h{}m", h, m) }
	} else {
		let d = secs / 86400;
		let h = (secs % 86400) / 3600;
		if h == 0 { format!("{}d", d) } else { format!("{}d{}h", d, h) }
	}
}

fn state_marker(state: StreamState) -> (String, String) {
	let label = state.to_string();
	match state {
		StreamState::Running => ("●".green().to_string(), label.green().to_string()),
		StreamState::Starting | StreamState::Rotating => {
			("●".cyan().to_string(), label.cyan().to_string())
		}
		StreamState::Restarting => ("●".yellow().to_string(), label.yellow().to_string()),
		StreamState::Failed => ("●".red().to_string(), label.red().to_string()),
		StreamState::Idle => ("○".dimmed().to_string(), label.dimmed().to_string()),
	}
}

pub fn print_streams(streams: &[StreamStatus]) {
	if streams.is_empty() {
		println!("{}", "no streams tracked".dimmed());
		return;
	}

	let name_width = streams.iter().map(|s| s.name.len()).max().unwrap_or(4).max(4);
	for s in streams {
		let (circle, label) = state_marker(s.state);
		let uptime = s.uptime_secs.map(compact_uptime).unwrap_or_else(|| "-".into());
		let pid = s.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
		let counters = format!("crashes {} rotations {}", s.crashes, s.rotations);
		println!(
			"{} {:<width$} {:<8} {:<8} {:<12} {}",
			circle,
			s.name,
			uptime,
			pid,
			label,
			counters.dimmed(),
			width = name_width
		);
		if let Some(exit) = &s.last_exit {
			println!("  {} {}", "last exit:".dimmed(), exit);
		}
	}

	let active = streams.iter().filter(|s| s.is_active()).count();
	println!();
	println!("{} of {} streams running", active, streams.len());
}

/// Turns a chat-formatted report into plain terminal text.
pub fn strip_html(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	let mut in_tag = false;
	for c in text.chars() {
		match c {
			'<' => in_tag = true,
			'>' if in_tag => in_tag = false,
			_ if !in_tag => out.push(c),
			_ => {}
		}
	}
	out.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}
