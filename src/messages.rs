// Message types exchanged with the operator UI over the bus

use serde::{Deserialize, Serialize};

use crate::astro::{ApparentPosition, Body};
use crate::control::{MountState, TimeSelection};

/// Operator request, UI -> runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OperatorCommand {
    Connect {
        port: String,
        #[serde(default)]
        baud: Option<u32>,
    },
    Disconnect,
    Goto,
    Track {
        enabled: bool,
    },
    ToggleTrack,
    Zero,
    SetTarget {
        body: Body,
    },
    SetLocation {
        latitude: f64,
        longitude: f64,
        elevation: f64,
    },
    /// Temperature (°C) and pressure (mbar) as typed by the operator
    SetAtmosphere {
        enabled: bool,
        temperature: String,
        pressure: String,
    },
    SetTime {
        time: TimeSelection,
    },
}

/// Something the operator should see, runtime -> UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    LinkOpened { port: String },
    LinkClosed { port: String },
    LinkFault { message: String },
    /// A line reported by the mount firmware
    SerialLine { line: String },
    GotoIssued { command: String },
    GotoRejected { reason: String },
    Tracking { enabled: bool },
    TrackFrameSent { azimuth_dps: f64, altitude_dps: f64 },
    Zeroed,
    /// Recoverable problem: bad input, failed send, missing position
    Diagnostic { message: String },
}

/// Periodic snapshot published by the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountStatus {
    /// Port name while a serial link is open
    pub link: Option<String>,
    pub tracking: bool,
    pub target: Body,
    pub time: TimeSelection,
    pub refraction: bool,
    /// Where the target is now, if the ephemeris could resolve it
    pub target_position: Option<ApparentPosition>,
    /// Last commanded mount position
    pub mount: MountState,
}
