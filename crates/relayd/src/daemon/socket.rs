use relayd_core::protocol::{Request, Response};
use relayd_supervisor::{Command, Supervisor};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Line-delimited JSON control socket. One request per line, one response
/// per line, until the peer hangs up.
pub async fn run_socket_server(socket_path: &Path, sup: Arc<Supervisor>) {
	let listener = match UnixListener::bind(socket_path) {
		Ok(l) => l,
		Err(e) => {
			tracing::error!("failed to bind socket {}: {}", socket_path.display(), e);
			return;
		}
	};

	tracing::info!("listening on {}", socket_path.display());

	loop {
		let (stream, _) = match listener.accept().await {
			Ok(s) => s,
			Err(e) => {
				tracing::error!("accept error: {}", e);
				continue;
			}
		};

		let sup = Arc::clone(&sup);
		tokio::spawn(async move {
			handle_connection(stream, sup).await;
		});
	}
}

fn requester_of(stream: &UnixStream) -> String {
	match stream.peer_cred() {
		Ok(cred) => format!("uid:{}", cred.uid()),
		Err(_) => "socket".to_string(),
	}
}

async fn handle_connection(stream: UnixStream, sup: Arc<Supervisor>) {
	let requester = requester_of(&stream);
	let (reader, mut writer) = stream.into_split();
	let mut lines = BufReader::new(reader).lines();

	while let Ok(Some(line)) = lines.next_line().await {
		let response = match serde_json::from_str::<Request>(&line) {
			Ok(request) => handle_request(&sup, &requester, request).await,
			Err(e) => {
				tracing::warn!("invalid request: {}", e);
				Response::Error {
					message: format!("invalid request: {}", e),
				}
			}
		};

		let mut data = match serde_json::to_vec(&response) {
			Ok(d) => d,
			Err(e) => {
				tracing::error!("failed to serialize response: {}", e);
				continue;
			}
		};
		data.push(b'\n');

		if writer.write_all(&data).await.is_err() {
			break;
		}
	}
}

pub async fn handle_request(sup: &Supervisor, requester: &str, request: Request) -> Response {
	let command = match request {
		Request::Ping => return Response::Pong,
		Request::Streams => {
			return Response::Streams {
				streams: sup.snapshot().await,
			}
		}
		Request::Info => Command::Info,
		Request::Status => Command::Status,
		Request::Help => Command::Help,
	};
	Response::Text {
		text: sup.answer(requester, command).await,
	}
}
