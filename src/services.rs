//! ==============================================================================
//! services.rs - actuator controller and reader service clients
//! ==============================================================================
//!
//! purpose:
//!     the finish-line workflow needs two outside services:
//!     - the actuator controller, told to stop the truck
//!     - the reader, asked to capture the truck's identification code
//!
//!     both are request/response over http. timeouts are short: a missing
//!     service should fail the step quickly, never hang the workflow.
//!
//! ==============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service answered {0}")]
    Status(u16),
}

#[async_trait]
pub trait Actuator: Send + Sync {
    async fn stop(&self) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait Reader: Send + Sync {
    async fn capture(&self) -> Result<CaptureResponse, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureResult {
    #[serde(alias = "Success", alias = "SUCCESS")]
    Success,
    #[serde(alias = "Failure", alias = "FAILURE")]
    Failure,
}

/// reader reply: `{result, code?, message?}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaptureResponse {
    pub result: CaptureResult,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

fn client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()?)
}

pub struct HttpActuator {
    client: reqwest::Client,
    stop_url: String,
}

impl HttpActuator {
    pub fn new(stop_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self { client: client(timeout)?, stop_url: stop_url.into() })
    }
}

#[async_trait]
impl Actuator for HttpActuator {
    async fn stop(&self) -> Result<(), ServiceError> {
        debug!(url = %self.stop_url, "stopping actuator");
        let resp = self.client.post(&self.stop_url).send().await?;
        if !resp.status().is_success() {
            return Err(ServiceError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

pub struct HttpReader {
    client: reqwest::Client,
    capture_url: String,
}

impl HttpReader {
    pub fn new(capture_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self { client: client(timeout)?, capture_url: capture_url.into() })
    }
}

#[async_trait]
impl Reader for HttpReader {
    async fn capture(&self) -> Result<CaptureResponse, ServiceError> {
        debug!(url = %self.capture_url, "requesting capture");
        let resp = self.client.post(&self.capture_url).send().await?;
        // the reader reports its own failures in the body, so parse those too
        if resp.status().is_server_error() {
            return Err(ServiceError::Status(resp.status().as_u16()));
        }
        Ok(resp.json().await?)
    }
}
