// ── Schedule domain type ──

use serde::{Deserialize, Serialize};

use super::PistonState;

/// A scheduled valve operation: at the times described by the cron
/// expression, drive one piston to `action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub device_id: String,
    pub name: String,
    pub piston_number: u32,
    pub action: PistonState,
    pub cron_expression: String,
    pub enabled: bool,
}
