//! Maps decoded commands onto the state store.
//!
//! Dispatch runs synchronously on the calling endpoint's task, under the
//! addressed unit's lock. The lock is released before the response is
//! encoded; no handler suspends mid-operation.

use std::sync::Arc;

use heapless::Vec;
use tracing::{debug, warn};

use crate::lines::LogicalUnit;
use crate::measurements;
use crate::protocol::{Command, CommandArgs, CommandStatus, MessageId, Response, ResponseData};
use crate::state::{PduMode, PduStateManager, PduUnit};

#[derive(Debug)]
pub struct Dispatcher {
    state: Arc<PduStateManager>,
    /// Simulator mode has no ADC; line mutations re-derive the owning
    /// unit's measurement channels from the model instead.
    model_measurements: bool,
}

impl Dispatcher {
    pub fn new(state: Arc<PduStateManager>, model_measurements: bool) -> Self {
        Self {
            state,
            model_measurements,
        }
    }

    pub fn state(&self) -> &Arc<PduStateManager> {
        &self.state
    }

    /// Execute one command against the unit owning `apid`. Returns None
    /// for APIDs owned by other devices on the bus; those are ignored
    /// silently.
    pub fn dispatch(&self, apid: u16, command: Command) -> Option<Response> {
        let unit = self.state.unit(apid)?;
        let mut unit = PduStateManager::lock(unit);
        debug!(
            apid,
            message = ?command.message_id,
            logical_unit = command.logical_unit_id,
            "dispatching command"
        );
        Some(self.execute(&mut unit, command))
    }

    /// A structurally valid packet carried an unrecognized MessageID:
    /// count it and echo the raw id back with an error status.
    pub fn unknown_message(&self, apid: u16, message_id: u8, logical_unit_id: u8) -> Option<Response> {
        let unit = self.state.unit(apid)?;
        let mut unit = PduStateManager::lock(unit);
        unit.status.counters.unknown_command = unit.status.counters.unknown_command.saturating_add(1);
        warn!(message_id, "unknown message id");
        Some(Response::failure(
            message_id,
            logical_unit_id,
            CommandStatus::UnknownMessage,
        ))
    }

    /// A frame or packet failed structural decode: count it against the
    /// addressed unit and report the failure.
    pub fn malformed_frame(&self, apid: u16, message_id: u8, logical_unit_id: u8) -> Option<Response> {
        let unit = self.state.unit(apid)?;
        let mut unit = PduStateManager::lock(unit);
        unit.status.counters.checksum_failed = unit.status.counters.checksum_failed.saturating_add(1);
        Some(Response::failure(
            message_id,
            logical_unit_id,
            CommandStatus::MalformedFrame,
        ))
    }

    fn execute(&self, unit: &mut PduUnit, command: Command) -> Response {
        let message_id = command.message_id;
        let lu_id = command.logical_unit_id;

        match message_id {
            MessageId::ObcHeartBeat => {
                let counter = match command.args {
                    CommandArgs::Heartbeat { counter } => counter,
                    _ => 0,
                };
                unit.record_heartbeat(counter);
                Response::success(
                    message_id,
                    lu_id,
                    ResponseData::HeartbeatEcho {
                        counter,
                        mode: unit.status.mode.as_u8(),
                    },
                )
            }

            MessageId::GetPduStatus => {
                unit.status.uptime_ticks = unit.uptime_secs();
                Response::success(
                    message_id,
                    lu_id,
                    ResponseData::Status {
                        mode: unit.status.mode.as_u8(),
                        counters: unit.status.counters,
                        uptime_s: unit.status.uptime_ticks,
                    },
                )
            }

            MessageId::PduGoLoad
            | MessageId::PduGoOperate
            | MessageId::PduGoSafe
            | MessageId::PduGoMaintenance => self.mode_transition(unit, message_id, lu_id),

            MessageId::SetUnitPwLines
            | MessageId::ResetUnitPwLines
            | MessageId::OverwriteUnitPwLines => self.line_command(unit, command),

            MessageId::GetUnitLineStates => match self.logical_unit(unit, message_id, lu_id) {
                Ok(lu) => Response::success(
                    message_id,
                    lu_id,
                    ResponseData::LineMask {
                        mask: unit.line_states.unit_mask(lu),
                    },
                ),
                Err(response) => response,
            },

            MessageId::GetRawMeasurements => match self.logical_unit(unit, message_id, lu_id) {
                Ok(lu) => {
                    let mut channels = Vec::new();
                    for channel in lu.adc_range() {
                        let _ = channels.push(unit.raw.channels[channel]);
                    }
                    Response::success(message_id, lu_id, ResponseData::RawChannels(channels))
                }
                Err(response) => response,
            },

            MessageId::GetConvertedMeasurements => match self.logical_unit(unit, message_id, lu_id) {
                Ok(lu) => {
                    let mut channels = Vec::new();
                    for channel in lu.adc_range() {
                        let _ = channels.push(unit.converted.channels[channel]);
                    }
                    Response::success(message_id, lu_id, ResponseData::ConvertedChannels(channels))
                }
                Err(response) => response,
            },
        }
    }

    /// Mode state machine. Any transition outside the table is rejected
    /// and counted.
    fn mode_transition(&self, unit: &mut PduUnit, message_id: MessageId, lu_id: u8) -> Response {
        let current = unit.status.mode;
        let next = match (current, message_id) {
            (PduMode::Boot, MessageId::PduGoLoad) => PduMode::Load,
            (PduMode::Load, MessageId::PduGoOperate) => PduMode::Operate,
            (PduMode::Safe, MessageId::PduGoOperate) => PduMode::Operate,
            (PduMode::Maintenance, MessageId::PduGoOperate) => PduMode::Operate,
            (PduMode::Operate, MessageId::PduGoSafe) => PduMode::Safe,
            (PduMode::Operate, MessageId::PduGoMaintenance) => PduMode::Maintenance,
            _ => {
                unit.status.counters.command_rejected =
                    unit.status.counters.command_rejected.saturating_add(1);
                warn!(?current, requested = ?message_id, "state transition rejected");
                return Response::failure(
                    message_id.as_u8(),
                    lu_id,
                    CommandStatus::InvalidStateTransition,
                );
            }
        };

        unit.status.mode = next;
        if next == PduMode::Safe {
            // Safing drops every switchable load
            unit.line_states.all_off();
            if self.model_measurements {
                self.remodel_all(unit);
            }
        }
        debug!(from = ?current, to = ?next, "mode transition");
        Response::success(message_id, lu_id, ResponseData::None)
    }

    fn line_command(&self, unit: &mut PduUnit, command: Command) -> Response {
        let message_id = command.message_id;
        let lu_id = command.logical_unit_id;
        let lu = match self.logical_unit(unit, message_id, lu_id) {
            Ok(lu) => lu,
            Err(response) => return response,
        };

        if !unit.status.mode.allows_line_switching() {
            unit.status.counters.command_rejected =
                unit.status.counters.command_rejected.saturating_add(1);
            return Response::failure(
                message_id.as_u8(),
                lu_id,
                CommandStatus::LineTransitionForbidden,
            );
        }

        let mask = match command.args {
            CommandArgs::LineMask { mask } => mask,
            _ => 0,
        };
        match message_id {
            MessageId::SetUnitPwLines => unit.line_states.set_masked(lu, mask),
            MessageId::ResetUnitPwLines => unit.line_states.clear_masked(lu, mask),
            MessageId::OverwriteUnitPwLines => unit.line_states.overwrite(lu, mask),
            _ => {}
        }
        if self.model_measurements {
            measurements::model_logical_unit(lu, &unit.line_states, &mut unit.raw, &mut unit.converted);
        }
        Response::success(message_id, lu_id, ResponseData::None)
    }

    fn logical_unit(
        &self,
        unit: &mut PduUnit,
        message_id: MessageId,
        lu_id: u8,
    ) -> Result<LogicalUnit, Response> {
        LogicalUnit::from_id(lu_id).ok_or_else(|| {
            unit.status.counters.command_rejected =
                unit.status.counters.command_rejected.saturating_add(1);
            Response::failure(message_id.as_u8(), lu_id, CommandStatus::UnknownLogicalUnit)
        })
    }

    fn remodel_all(&self, unit: &mut PduUnit) {
        for lu in LogicalUnit::ALL {
            measurements::model_logical_unit(lu, &unit.line_states, &mut unit.raw, &mut unit.converted);
        }
    }
}
