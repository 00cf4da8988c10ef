// ── Domain model ──

mod device;
mod schedule;

pub use device::{Device, Piston, PistonState};
pub use schedule::Schedule;
