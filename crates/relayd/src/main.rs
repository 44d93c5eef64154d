mod client;
mod daemon;
mod graph;
mod render;
mod source;
mod telegram;

use client::{ClientError, DaemonClient};
use owo_colors::OwoColorize;
use relayd_core::protocol::{Request, Response};
use std::path::PathBuf;

fn main() {
	let args: Vec<String> = std::env::args().skip(1).collect();

	if args.is_empty() {
		print_usage();
		return;
	}

	match args[0].as_str() {
		"help" | "--help" | "-h" => cmd_help(),
		"version" | "--version" | "-V" => println!("relayd {}", env!("CARGO_PKG_VERSION")),
		"run" => cmd_run(&args[1..]),
		"check-config" => cmd_check_config(&args[1..]),
		"streams" | "ls" => cmd_streams(),
		"status" | "st" => cmd_report(Request::Status),
		"info" => cmd_report(Request::Info),
		"ping" => cmd_ping(),
		other => {
			eprintln!("unknown command: {}", other);
			eprintln!("run 'relayd help' for usage");
			std::process::exit(1);
		}
	}
}

fn print_usage() {
	eprintln!("{} {}: keeps stream relays in sync with a desired-state API", "relayd".bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} [command] [options]", "relayd".bold());
	eprintln!();

	eprintln!("{}", "daemon".cyan().bold());
	eprintln!("  {} [--config PATH] [--http]   Run the supervisor in the foreground", "run".bold());
	eprintln!("  {} [--config PATH]   Validate the config file and exit", "check-config".bold());
	eprintln!();

	eprintln!("{}", "query".cyan().bold());
	eprintln!("  {}                          List tracked streams", "streams".bold());
	eprintln!("  {}                           Short fleet summary", "status".bold());
	eprintln!("  {}                             Full system report", "info".bold());
	eprintln!("  {}                             Check the daemon is alive", "ping".bold());
	eprintln!();

	eprintln!("{}", "environment".cyan().bold());
	eprintln!("  {}   Override telegram.bot_token", "RELAYD_TELEGRAM_TOKEN".bold());
	eprintln!("  {}                Log filter (default: info)", "RUST_LOG".bold());
}

/// Usage, followed by the running daemon's schedule when one answers.
fn cmd_help() {
	print_usage();
	let Ok(mut client) = DaemonClient::connect() else {
		return;
	};
	if let Ok(Response::Text { text }) = client.send(&Request::Help) {
		eprintln!();
		eprintln!("{}", render::strip_html(&text));
	}
}

fn parse_run_options(args: &[String]) -> daemon::RunOptions {
	let mut opts = daemon::RunOptions::default();
	let mut iter = args.iter();
	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"--http" => opts.http = true,
			"--config" | "-c" => match iter.next() {
				Some(path) => opts.config_path = Some(PathBuf::from(path)),
				None => {
					eprintln!("error: --config needs a path");
					std::process::exit(2);
				}
			},
			other => {
				eprintln!("error: unexpected argument: {}", other);
				std::process::exit(2);
			}
		}
	}
	opts
}

fn cmd_run(args: &[String]) {
	let opts = parse_run_options(args);
	daemon::init_logging();

	let rt = match tokio::runtime::Runtime::new() {
		Ok(rt) => rt,
		Err(e) => {
			eprintln!("error: failed to start runtime: {}", e);
			std::process::exit(1);
		}
	};

	if let Err(e) = rt.block_on(daemon::run(opts)) {
		eprintln!("{} {}", "error:".red().bold(), e);
		std::process::exit(1);
	}
}

fn cmd_check_config(args: &[String]) {
	let opts = parse_run_options(args);
	match daemon::load_config(&opts) {
		Ok(config) => {
			println!("{} config ok", "●".green());
			println!("  source        {}", config.source.url);
			println!("  poll          {}s", config.source.poll_interval_secs);
			println!("  relay         {}", config.relay.program);
			println!("  cache         {}", config.cache.resolved_path().display());
			let telegram = if config.telegram.is_configured() { "configured" } else { "off" };
			println!("  telegram      {}", telegram);
		}
		Err(e) => {
			eprintln!("{} {}", "●".red(), e);
			std::process::exit(1);
		}
	}
}

fn request(req: &Request) -> Response {
	let result = DaemonClient::connect().and_then(|mut c| c.send(req));
	match result {
		Ok(resp) => resp,
		Err(ClientError::NotRunning) => {
			eprintln!("{} daemon not running", "●".red());
			if let Some(pid) = client::read_pid() {
				eprintln!("  stale pid file points at {}", pid);
			}
			std::process::exit(1);
		}
		Err(e) => {
			eprintln!("error: {}", e);
			std::process::exit(1);
		}
	}
}

fn cmd_streams() {
	match request(&Request::Streams) {
		Response::Streams { streams } => render::print_streams(&streams),
		other => unexpected(other),
	}
}

fn cmd_report(req: Request) {
	match request(&req) {
		Response::Text { text } => println!("{}", render::strip_html(&text)),
		other => unexpected(other),
	}
}

fn cmd_ping() {
	match request(&Request::Ping) {
		Response::Pong => println!("{} daemon is running", "●".green()),
		other => unexpected(other),
	}
}

fn unexpected(resp: Response) -> ! {
	match resp {
		Response::Error { message } => eprintln!("error: {}", message),
		other => eprintln!("error: unexpected response: {:?}", other),
	}
	std::process::exit(1);
}
