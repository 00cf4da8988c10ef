// ── Wire DTOs ──
//
// Exactly what the irrigation service sends and receives as JSON.
// Field names follow the backend's camelCase convention; irrisync-core
// converts these into domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Valve state as the backend encodes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValveState {
    Active,
    Inactive,
}

/// One controllable output channel on a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PistonDto {
    pub piston_number: u32,
    pub state: ValveState,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
}

/// A controllable device and its pistons.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDto {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub pistons: Vec<PistonDto>,
}

/// A scheduled valve operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDto {
    pub id: String,
    pub device_id: String,
    pub name: String,
    pub piston_number: u32,
    pub action: ValveState,
    pub cron_expression: String,
    pub enabled: bool,
}

/// Create/update payload for a schedule. The server assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub device_id: String,
    pub name: String,
    pub piston_number: u32,
    pub action: ValveState,
    pub cron_expression: String,
    pub enabled: bool,
}

/// Body of the toggle endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRequest {
    pub state: ValveState,
}

/// Device connectivity status announced over the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatusKind {
    Online,
    Offline,
    #[serde(other)]
    Unknown,
}
