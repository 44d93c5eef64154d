use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use relayd_core::StreamStatus;
use relayd_supervisor::{Command, Supervisor};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
	pub supervisor: Arc<Supervisor>,
}

pub fn router(supervisor: Arc<Supervisor>) -> Router {
	let state = AppState { supervisor };

	Router::new()
		.route("/api/streams", get(list_streams))
		.route("/api/health", get(health))
		.route("/api/report/{kind}", get(report))
		.layer(CorsLayer::permissive())
		.with_state(state)
}

#[derive(Serialize)]
struct Health {
	uptime_secs: u64,
	streams: usize,
	active: usize,
	shutting_down: bool,
}

async fn list_streams(State(state): State<AppState>) -> Json<Vec<StreamStatus>> {
	Json(state.supervisor.snapshot().await)
}

async fn health(State(state): State<AppState>) -> Json<Health> {
	let sup = &state.supervisor;
	let streams = sup.snapshot().await;
	Json(Health {
		uptime_secs: sup.uptime().as_secs(),
		streams: streams.len(),
		active: streams.iter().filter(|s| s.is_active()).count(),
		shutting_down: sup.is_shutting_down(),
	})
}

async fn report(
	State(state): State<AppState>,
	ConnectInfo(peer): ConnectInfo<SocketAddr>,
	Path(kind): Path<String>,
) -> Response {
	let Some(command) = Command::from_name(&kind) else {
		return (StatusCode::NOT_FOUND, format!("unknown report: {}", kind)).into_response();
	};
	let requester = format!("http:{}", peer.ip());
	state.supervisor.answer(&requester, command).await.into_response()
}

pub async fn run_http_server(supervisor: Arc<Supervisor>, port: u16) {
	let app = router(supervisor);
	let addr = SocketAddr::from(([127, 0, 0, 1], port));
	let listener = match tokio::net::TcpListener::bind(addr).await {
		Ok(l) => l,
		Err(e) => {
			tracing::error!("failed to bind HTTP on {}: {}", addr, e);
			return;
		}
	};
	tracing::info!("HTTP listening on {}", addr);
	let service = app.into_make_service_with_connect_info::<SocketAddr>();
	if let Err(e) = axum::serve(listener, service).await {
		tracing::error!("HTTP server error: {}", e);
	}
}
