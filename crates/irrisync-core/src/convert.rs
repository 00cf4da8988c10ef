// ── Wire-to-domain conversions ──
//
// DTOs arrive unordered and unstamped; conversion sorts pistons by
// number and leaves the version stamp at zero. The reconciler assigns
// real stamps when it applies data to the store.

use irrisync_api::models::{DeviceDto, PistonDto, ScheduleDto, ValveState};

use crate::model::{Device, Piston, PistonState, Schedule};

impl From<ValveState> for PistonState {
    fn from(state: ValveState) -> Self {
        match state {
            ValveState::Active => PistonState::Active,
            ValveState::Inactive => PistonState::Inactive,
        }
    }
}

impl From<PistonState> for ValveState {
    fn from(state: PistonState) -> Self {
        match state {
            PistonState::Active => ValveState::Active,
            PistonState::Inactive => ValveState::Inactive,
        }
    }
}

impl From<PistonDto> for Piston {
    fn from(dto: PistonDto) -> Self {
        Self {
            number: dto.piston_number,
            state: dto.state.into(),
            last_triggered: dto.last_triggered,
            version: 0,
        }
    }
}

impl From<DeviceDto> for Device {
    fn from(dto: DeviceDto) -> Self {
        let mut pistons: Vec<Piston> = dto.pistons.into_iter().map(Piston::from).collect();
        pistons.sort_by_key(|p| p.number);
        pistons.dedup_by_key(|p| p.number);
        Self {
            id: dto.id,
            name: dto.name,
            pistons,
        }
    }
}

impl From<ScheduleDto> for Schedule {
    fn from(dto: ScheduleDto) -> Self {
        Self {
            id: dto.id,
            device_id: dto.device_id,
            name: dto.name,
            piston_number: dto.piston_number,
            action: dto.action.into(),
            cron_expression: dto.cron_expression,
            enabled: dto.enabled,
        }
    }
}
