//! ==============================================================================
//! route.rs - route replay engine
//! ==============================================================================
//!
//! purpose:
//!     holds the single active route and replays it one waypoint per sensor
//!     edge. replay never ends: the cursor wraps back to the first point.
//!
//! relationships:
//!     - used by: controller.rs (route load / reset commands, non-finish edges)
//!     - used by: workflow.rs (finish-line precondition and cleanup)
//!     - uses: transport (telemetry sink for the current waypoint)
//!
//! ==============================================================================

use crate::domain::{Coordinate, VehicleId};
use crate::transport::{Telemetry, TransportError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("route for {0} has no points")]
    Empty(VehicleId),
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("no route loaded")]
    NoRouteLoaded,
    #[error("telemetry dispatch failed: {0}")]
    Transport(#[from] TransportError),
}

/// an ordered, non-empty list of waypoints owned by one vehicle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    vehicle_id: VehicleId,
    points: Vec<Coordinate>,
    cursor: usize,
}

impl Route {
    pub fn new(vehicle_id: VehicleId, points: Vec<Coordinate>) -> Result<Self, RouteError> {
        if points.is_empty() {
            return Err(RouteError::Empty(vehicle_id));
        }
        Ok(Self { vehicle_id, points, cursor: 0 })
    }

    pub fn vehicle_id(&self) -> &VehicleId {
        &self.vehicle_id
    }

    pub fn points(&self) -> &[Coordinate] {
        &self.points
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// current waypoint; moves the cursor to the next one (wrapping)
    pub fn advance(&mut self) -> Coordinate {
        let point = self.points[self.cursor];
        self.cursor = (self.cursor + 1) % self.points.len();
        point
    }
}

/// the replay engine; at most one route is active at a time
#[derive(Debug, Default)]
pub struct RouteReplay {
    active: Option<Route>,
}

impl RouteReplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&Route> {
        self.active.as_ref()
    }

    /// replace the active route outright (last writer wins, cursor back to 0)
    pub fn load(&mut self, route: Route) -> &Route {
        if let Some(old) = &self.active {
            debug!(vehicle = %old.vehicle_id, cursor = old.cursor, "replacing active route");
        }
        info!(vehicle = %route.vehicle_id, points = route.points.len(), "route loaded");
        self.active.insert(route)
    }

    /// drop the active route; returns it if there was one
    pub fn clear(&mut self) -> Option<Route> {
        self.active.take()
    }

    /// dispatch the current waypoint and advance the cursor
    ///
    /// the cursor moves even if the dispatch fails so a flaky transport
    /// cannot pin replay to one point.
    pub async fn on_edge(&mut self, telemetry: &dyn Telemetry) -> Result<Coordinate, ReplayError> {
        let route = self.active.as_mut().ok_or(ReplayError::NoRouteLoaded)?;
        let index = route.cursor;
        let point = route.advance();
        debug!(
            vehicle = %route.vehicle_id,
            index,
            lat = point.latitude,
            lon = point.longitude,
            "replaying waypoint"
        );
        telemetry.update_telemetry(&route.vehicle_id, point.to_fields()).await?;
        Ok(point)
    }
}
