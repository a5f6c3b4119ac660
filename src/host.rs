//! Collaborators the VM talks to: the I/O facade and the tick source.
//!
//! `HeadlessIo` is a facade without a robot attached. It remembers port
//! configuration, answers sensor reads from configurable values and records
//! everything the program asked for as [`HostEvent`]s.

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::vm::MemoryError;
use crate::vm::syscall::{ParamCluster, SyscallRequest, syscall_name};

// =============================================================================
// Traits
// =============================================================================

/// Everything a program can do to the outside world.
pub trait IoFacade {
    /// Perform a syscall. The facade writes the status field of the cluster.
    fn syscall(&mut self, id: u16, cluster: &mut ParamCluster<'_>) -> Result<(), MemoryError>;

    fn set_input_config(&mut self, port: i32, property: u16, value: i32);

    fn input_config(&mut self, port: i32, property: u16) -> i32;

    fn set_output_config(&mut self, port: i32, property: u16, value: i32);

    fn output_config(&mut self, port: i32, property: u16) -> i32;
}

/// Millisecond clock read by WAIT and GETTICK.
pub trait TickSource {
    fn current_tick(&self) -> u32;

    /// Jump forward to `tick` if this clock can be driven. Returns whether it did.
    fn advance_to(&mut self, _tick: u32) -> bool {
        false
    }
}

/// Wall-clock milliseconds since construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for SystemClock {
    fn current_tick(&self) -> u32 {
        u32::try_from(self.start.elapsed().as_millis()).unwrap_or(u32::MAX)
    }
}

/// Deterministic clock that only moves when told to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManualClock {
    tick: u32,
}

impl ManualClock {
    pub fn new(tick: u32) -> Self {
        Self { tick }
    }

    pub fn advance(&mut self, ms: u32) {
        self.tick = self.tick.wrapping_add(ms);
    }

    pub fn set(&mut self, tick: u32) {
        self.tick = tick;
    }
}

impl TickSource for ManualClock {
    fn current_tick(&self) -> u32 {
        self.tick
    }

    fn advance_to(&mut self, tick: u32) -> bool {
        if tick > self.tick {
            self.tick = tick;
        }
        true
    }
}

// =============================================================================
// Port properties
// =============================================================================

pub const IO_IN_TYPE: u16 = 0x0;
pub const IO_IN_MODE: u16 = 0x1;
pub const IO_IN_SCALED_VAL: u16 = 0x4;
pub const IO_IN_INVALID_DATA: u16 = 0x5;

pub const IO_OUT_FLAGS: u16 = 0x0;
pub const IO_OUT_MODE: u16 = 0x1;
pub const IO_OUT_SPEED: u16 = 0x2;
pub const IO_OUT_ACTUAL_SPEED: u16 = 0x3;
pub const IO_OUT_RUN_STATE: u16 = 0x6;
pub const IO_OUT_REG_MODE: u16 = 0x8;
pub const IO_OUT_OVERLOAD: u16 = 0x9;

const MOTOR_ON: i32 = 0x01;
const RUN_STATE_RUNNING: i32 = 0x20;
const REG_MODE_SPEED: i32 = 0x1;
const REG_MODE_SYNC: i32 = 0x3;

pub fn input_property_name(property: u16) -> &'static str {
    match property {
        0x0 => "IO_IN_TYPE",
        0x1 => "IO_IN_MODE",
        0x2 => "IO_IN_ADRAW",
        0x3 => "IO_IN_NORMRAW",
        0x4 => "IO_IN_SCALED_VAL",
        0x5 => "IO_IN_INVALID_DATA",
        _ => "IO_IN_?",
    }
}

pub fn output_property_name(property: u16) -> &'static str {
    match property {
        0x0 => "IO_OUT_FLAGS",
        0x1 => "IO_OUT_MODE",
        0x2 => "IO_OUT_SPEED",
        0x3 => "IO_OUT_ACTUAL_SPEED",
        0x4 => "IO_OUT_TACH_COUNT",
        0x5 => "IO_OUT_TACH_LIMIT",
        0x6 => "IO_OUT_RUN_STATE",
        0x7 => "IO_OUT_TURN_RATIO",
        0x8 => "IO_OUT_REG_MODE",
        0x9 => "IO_OUT_OVERLOAD",
        0xA => "IO_OUT_REG_P_VAL",
        0xB => "IO_OUT_REG_I_VAL",
        0xC => "IO_OUT_REG_D_VAL",
        0xD => "IO_OUT_BLOCK_TACH_COUNT",
        0xE => "IO_OUT_ROTATION_COUNT",
        _ => "IO_OUT_?",
    }
}

// =============================================================================
// HeadlessIo
// =============================================================================

/// Something the program asked the host to do.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    PlayFile {
        filename: String,
        looping: bool,
        volume: f32,
    },
    PlayTone {
        frequency: i32,
        duration: i32,
        looping: bool,
        volume: f32,
    },
    LowSpeedWrite {
        port: i32,
        bytes: Vec<u8>,
    },
    LowSpeedRead {
        port: i32,
        bytes: Vec<u8>,
    },
    IgnoredSyscall {
        id: u16,
        name: &'static str,
    },
    SetInput {
        port: i32,
        property: &'static str,
        value: i32,
    },
    SetOutput {
        port: i32,
        property: &'static str,
        value: i32,
    },
}

const LOWSPEED_BUFFER_SIZE: usize = 16;

/// Reference facade without a physical or simulated robot behind it.
#[derive(Debug, Clone, Default)]
pub struct HeadlessIo {
    sensors: [f32; 4],
    inputs: HashMap<(i32, u16), i32>,
    outputs: HashMap<(i32, u16), i32>,
    lowspeed: [u8; LOWSPEED_BUFFER_SIZE],
    bytes_ready: usize,
    events: Vec<HostEvent>,
}

impl HeadlessIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sensors(sensors: [f32; 4]) -> Self {
        Self {
            sensors,
            ..Self::default()
        }
    }

    pub fn set_sensor(&mut self, port: usize, value: f32) {
        if let Some(sensor) = self.sensors.get_mut(port) {
            *sensor = value;
        }
    }

    pub fn sensor(&self, port: i32) -> f32 {
        usize::try_from(port)
            .ok()
            .and_then(|p| self.sensors.get(p).copied())
            .unwrap_or(0.0)
    }

    pub fn events(&self) -> &[HostEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut self.events)
    }

    fn stored_output(&self, port: i32, property: u16) -> i32 {
        self.outputs.get(&(port, property)).copied().unwrap_or(0)
    }

    /// Emulates the ultrasonic sensor: "read measurement byte 0" is answered
    /// with the sensor value.
    fn lowspeed_write(&mut self, port: i32, bytes: &[u8]) -> i32 {
        if bytes.starts_with(&[0x02, 0x42]) {
            self.lowspeed[0] = self.sensor(port).clamp(0.0, 255.0) as u8;
            self.bytes_ready = 1;
        }
        0
    }

    fn lowspeed_read(&mut self, cluster: &mut ParamCluster<'_>) -> Result<Vec<u8>, MemoryError> {
        cluster.set_array_len(3, self.bytes_ready)?;
        let buffer = cluster.array_data_mut(3)?;
        let n = buffer.len().min(LOWSPEED_BUFFER_SIZE);
        buffer[..n].copy_from_slice(&self.lowspeed[..n]);
        Ok(buffer.to_vec())
    }
}

impl IoFacade for HeadlessIo {
    fn syscall(&mut self, id: u16, cluster: &mut ParamCluster<'_>) -> Result<(), MemoryError> {
        let request = SyscallRequest::decode(id, cluster)?;
        debug!(id, name = syscall_name(id), ?request, "syscall");

        let status = match request {
            SyscallRequest::PlayFile {
                filename,
                looping,
                volume,
            } => {
                match filename {
                    Some(filename) => self.events.push(HostEvent::PlayFile {
                        filename,
                        looping,
                        volume,
                    }),
                    None => warn!(cluster = cluster.base(), "rejected sound file name"),
                }
                0
            }
            SyscallRequest::PlayTone {
                frequency,
                duration,
                looping,
                volume,
            } => {
                self.events.push(HostEvent::PlayTone {
                    frequency,
                    duration,
                    looping,
                    volume,
                });
                0
            }
            SyscallRequest::LowSpeedWrite { port, buffer, .. } => {
                let status = self.lowspeed_write(port, &buffer);
                self.events.push(HostEvent::LowSpeedWrite {
                    port,
                    bytes: buffer,
                });
                status
            }
            SyscallRequest::LowSpeedRead { port, .. } => {
                let bytes = self.lowspeed_read(cluster)?;
                self.events.push(HostEvent::LowSpeedRead { port, bytes });
                0
            }
            SyscallRequest::LowSpeedCheckStatus { .. } => {
                cluster.set_scalar(3, self.bytes_ready as i32)?;
                0
            }
            SyscallRequest::Unsupported { id } => {
                let name = syscall_name(id);
                warn!(id, name, "ignoring syscall");
                self.events.push(HostEvent::IgnoredSyscall { id, name });
                0
            }
        };
        cluster.set_status(status)
    }

    fn set_input_config(&mut self, port: i32, property: u16, value: i32) {
        // Changes are processed immediately, so the flag never needs setting.
        if property == IO_IN_INVALID_DATA {
            return;
        }
        self.inputs.insert((port, property), value);
        self.events.push(HostEvent::SetInput {
            port,
            property: input_property_name(property),
            value,
        });
    }

    fn input_config(&mut self, port: i32, property: u16) -> i32 {
        match property {
            IO_IN_INVALID_DATA => 0,
            IO_IN_SCALED_VAL => (self.sensor(port).clamp(0.0, 1.0) * 100.0) as i32,
            _ => {
                let value = self.inputs.get(&(port, property)).copied().unwrap_or(0);
                debug!(
                    port,
                    property = input_property_name(property),
                    value,
                    "input property read"
                );
                value
            }
        }
    }

    fn set_output_config(&mut self, port: i32, property: u16, value: i32) {
        self.outputs.insert((port, property), value);
        self.events.push(HostEvent::SetOutput {
            port,
            property: output_property_name(property),
            value,
        });
    }

    fn output_config(&mut self, port: i32, property: u16) -> i32 {
        match property {
            IO_OUT_FLAGS => 0,
            IO_OUT_MODE => MOTOR_ON,
            IO_OUT_SPEED | IO_OUT_ACTUAL_SPEED => {
                i32::from(self.stored_output(port, IO_OUT_SPEED) as i8)
            }
            IO_OUT_RUN_STATE => {
                if self.stored_output(port, IO_OUT_SPEED) as i8 != 0 {
                    RUN_STATE_RUNNING
                } else {
                    0
                }
            }
            IO_OUT_REG_MODE => {
                if self.stored_output(port, IO_OUT_REG_MODE) & 0x02 != 0 {
                    REG_MODE_SYNC
                } else {
                    REG_MODE_SPEED
                }
            }
            IO_OUT_OVERLOAD => 0,
            _ => self.stored_output(port, property),
        }
    }
}
