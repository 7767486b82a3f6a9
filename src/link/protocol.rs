// Mount firmware wire protocol
//
// Text commands: newline-terminated ASCII
//   GOTO AZ=<f.2> ALT=<f.2> | STOP | ZERO
//
// Track frame (12 bytes, little-endian):
//   [STX, 'T', vaz:i32, valt:i32, checksum, ETX]
//   velocities in milli-degrees/second, checksum = sum(bytes[1..=9]) mod 256

use std::fmt;

/// Frame delimiters
pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;

/// Frame type for velocity tracking
pub const TRACK_TYPE: u8 = b'T';

/// Total length of a track frame
pub const TRACK_FRAME_LEN: usize = 12;

/// Wire units per degree/second
const MILLIDEG_PER_DEG: f64 = 1000.0;

/// Plain text commands understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextCommand {
    Goto { azimuth_deg: f64, altitude_deg: f64 },
    Stop,
    Zero,
}

impl TextCommand {
    /// Encode as a newline-terminated ASCII line
    pub fn encode(&self) -> Vec<u8> {
        format!("{}\n", self).into_bytes()
    }
}

impl fmt::Display for TextCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextCommand::Goto {
                azimuth_deg,
                altitude_deg,
            } => write!(f, "GOTO AZ={:.2} ALT={:.2}", azimuth_deg, altitude_deg),
            TextCommand::Stop => f.write_str("STOP"),
            TextCommand::Zero => f.write_str("ZERO"),
        }
    }
}

/// Velocity axis, used in overflow diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Azimuth,
    Altitude,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Azimuth => f.write_str("azimuth"),
            Axis::Altitude => f.write_str("altitude"),
        }
    }
}

/// Error types for frame encoding and decoding
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("{axis} velocity {value} deg/s exceeds the encodable range")]
    Overflow { axis: Axis, value: f64 },

    #[error("{axis} velocity is not a finite number")]
    NonFinite { axis: Axis },

    #[error("Invalid frame length: expected 12, got {0}")]
    InvalidLength(usize),

    #[error("Invalid frame markers: STX=0x{stx:02X}, ETX=0x{etx:02X}")]
    BadMarker { stx: u8, etx: u8 },

    #[error("Unknown frame type 0x{0:02X}")]
    UnknownType(u8),

    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{received:02X}")]
    ChecksumMismatch { expected: u8, received: u8 },
}

/// How degrees/second are turned into integer milli-degrees/second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quantization {
    /// Toward zero; this is what deployed firmware has always received
    #[default]
    Truncate,
    /// Nearest integer, halves away from zero
    Round,
}

impl Quantization {
    fn apply(self, value: f64) -> f64 {
        match self {
            Quantization::Truncate => value.trunc(),
            Quantization::Round => value.round(),
        }
    }
}

/// Angular velocity command in degrees/second
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackVelocity {
    pub azimuth_dps: f64,
    pub altitude_dps: f64,
}

/// Decoded/encodable track frame in wire units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackFrame {
    pub azimuth_mdps: i32,
    pub altitude_mdps: i32,
}

impl TrackFrame {
    /// Quantize a velocity pair, rejecting values that do not fit in i32
    pub fn from_velocity(
        velocity: TrackVelocity,
        quantization: Quantization,
    ) -> Result<Self, FrameError> {
        Ok(Self {
            azimuth_mdps: quantize(velocity.azimuth_dps, Axis::Azimuth, quantization)?,
            altitude_mdps: quantize(velocity.altitude_dps, Axis::Altitude, quantization)?,
        })
    }

    /// Velocity carried by this frame, degrees/second
    pub fn velocity(&self) -> TrackVelocity {
        TrackVelocity {
            azimuth_dps: self.azimuth_mdps as f64 / MILLIDEG_PER_DEG,
            altitude_dps: self.altitude_mdps as f64 / MILLIDEG_PER_DEG,
        }
    }

    /// Calculate checksum over type and payload
    fn checksum(data: &[u8]) -> u8 {
        data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
    }

    pub fn encode(&self) -> [u8; TRACK_FRAME_LEN] {
        let mut frame = [0u8; TRACK_FRAME_LEN];
        frame[0] = STX;
        frame[1] = TRACK_TYPE;
        frame[2..6].copy_from_slice(&self.azimuth_mdps.to_le_bytes());
        frame[6..10].copy_from_slice(&self.altitude_mdps.to_le_bytes());
        frame[10] = Self::checksum(&frame[1..10]);
        frame[11] = ETX;
        frame
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() != TRACK_FRAME_LEN {
            return Err(FrameError::InvalidLength(bytes.len()));
        }
        if bytes[0] != STX || bytes[11] != ETX {
            return Err(FrameError::BadMarker {
                stx: bytes[0],
                etx: bytes[11],
            });
        }
        if bytes[1] != TRACK_TYPE {
            return Err(FrameError::UnknownType(bytes[1]));
        }

        let expected = Self::checksum(&bytes[1..10]);
        if expected != bytes[10] {
            return Err(FrameError::ChecksumMismatch {
                expected,
                received: bytes[10],
            });
        }

        Ok(Self {
            azimuth_mdps: i32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
            altitude_mdps: i32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
        })
    }
}

/// Convert degrees/second to milli-degrees/second
fn quantize(dps: f64, axis: Axis, quantization: Quantization) -> Result<i32, FrameError> {
    if !dps.is_finite() {
        return Err(FrameError::NonFinite { axis });
    }
    let scaled = quantization.apply(dps * MILLIDEG_PER_DEG);
    if scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
        return Err(FrameError::Overflow { axis, value: dps });
    }
    Ok(scaled as i32)
}

/// Encode a velocity pair straight to wire bytes
pub fn encode_track(
    velocity: TrackVelocity,
    quantization: Quantization,
) -> Result<[u8; TRACK_FRAME_LEN], FrameError> {
    Ok(TrackFrame::from_velocity(velocity, quantization)?.encode())
}
