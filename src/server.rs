//! ==============================================================================
//! server.rs - route-load REST interface
//! ==============================================================================
//!
//! purpose:
//!     lets the dispatch side load a truck route before the run and reset it
//!     afterwards. also exposes the lcd so a step script can be tried out.
//!
//! endpoints:
//!     POST /gps/route        {vehicleId, points: [{lat, lon}, ...]}
//!     POST /gps/resetroute
//!     GET  /gps/route
//!     POST /lcd              [{"action": "write", "text": "hi"}, ...]
//!
//! every handler forwards a command to the controller and waits for its
//! reply; handlers never touch route or display state themselves.
//!
//! ==============================================================================

use crate::controller::{Command, DisplayCommandError};
use crate::domain::{Coordinate, VehicleId};
use crate::route::Route;
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

type Commands = mpsc::Sender<Command>;
type ApiResult = std::result::Result<Json<Value>, (StatusCode, Json<Value>)>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRequest {
    pub vehicle_id: VehicleId,
    #[serde(default)]
    pub points: Vec<Coordinate>,
}

pub fn router(commands: Commands) -> Router {
    Router::new()
        .route("/gps/route", post(load_route).get(route_status))
        .route("/gps/resetroute", post(reset_route))
        .route("/lcd", post(run_display))
        .layer(CorsLayer::permissive())
        .with_state(commands)
}

pub async fn run_server(bind: &str, port: u16, commands: Commands) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((bind, port)).await?;
    info!(bind, port, "route server listening");
    axum::serve(listener, router(commands)).await?;
    Ok(())
}

fn failure(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({"result": "Failure", "message": message.into()})))
}

/// send a command built around a fresh reply channel and wait for the answer
async fn ask<T>(
    commands: &Commands,
    build: impl FnOnce(oneshot::Sender<T>) -> Command,
) -> std::result::Result<T, (StatusCode, Json<Value>)> {
    let (reply, answer) = oneshot::channel();
    let unavailable = || failure(StatusCode::SERVICE_UNAVAILABLE, "controller not running");
    commands.send(build(reply)).await.map_err(|_| unavailable())?;
    answer.await.map_err(|_| unavailable())
}

async fn load_route(
    State(commands): State<Commands>,
    Json(request): Json<RouteRequest>,
) -> ApiResult {
    let route = Route::new(request.vehicle_id, request.points).map_err(|e| {
        warn!(error = %e, "rejected route");
        failure(StatusCode::BAD_REQUEST, e.to_string())
    })?;
    let status = ask(&commands, |reply| Command::LoadRoute { route, reply }).await?;
    Ok(Json(json!({
        "result": "Success",
        "message": format!("route loaded for {}", status.vehicle_id),
        "points": status.points,
    })))
}

async fn reset_route(State(commands): State<Commands>) -> ApiResult {
    let cleared = ask(&commands, |reply| Command::ResetRoute { reply }).await?;
    let message = match cleared {
        Some(status) => format!("route for {} cleared", status.vehicle_id),
        None => "no route loaded".to_string(),
    };
    Ok(Json(json!({"result": "Success", "message": message})))
}

async fn route_status(State(commands): State<Commands>) -> ApiResult {
    match ask(&commands, |reply| Command::RouteStatus { reply }).await? {
        Some(status) => Ok(Json(json!(status))),
        None => Err(failure(StatusCode::NOT_FOUND, "no route loaded")),
    }
}

async fn run_display(State(commands): State<Commands>, Json(script): Json<Value>) -> ApiResult {
    match ask(&commands, |reply| Command::Display { script, reply }).await? {
        Ok(()) => Ok(Json(json!({"result": "Success"}))),
        Err(DisplayCommandError::NoDisplay) => {
            Err(failure(StatusCode::SERVICE_UNAVAILABLE, "no display configured"))
        }
        Err(e @ DisplayCommandError::Script(_)) => {
            Err(failure(StatusCode::BAD_REQUEST, e.to_string()))
        }
    }
}
