//! Wire types for the HTTP API.

use serde::{Deserialize, Serialize};

use crate::pool::slot::{SessionInfo, Slot};
use crate::pool::PoolMode;

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub lease_minutes: u64,
    /// Session identity recorded on the slot at reservation time.
    #[serde(default)]
    pub session: Option<SessionInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub lease_minutes: u64,
}

#[derive(Debug, Deserialize)]
pub struct VncPasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct DebugRequest {
    pub debug: bool,
}

#[derive(Debug, Deserialize)]
pub struct ViewportRequest {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
pub struct ResolutionRequest {
    pub resolution: String,
}

#[derive(Debug, Serialize)]
pub struct BrowsersResponse {
    pub capacity: usize,
    pub used: usize,
    pub browsers: Vec<Slot>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub mode: PoolMode,
    pub capacity: usize,
    pub used: usize,
}
