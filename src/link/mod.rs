// Serial link to the mount firmware
//
// Provides:
// - Wire protocol: ASCII commands and the checksummed binary track frame
// - Serial transport: background line reader + atomic frame writer

pub mod protocol;
pub mod transport;

pub use protocol::{FrameError, Quantization, TextCommand, TrackFrame, TrackVelocity};
pub use transport::{
    CommandSink, LineStream, LinkEvent, LinkWriter, SerialLink, TransportError, DEFAULT_BAUDRATE,
};
