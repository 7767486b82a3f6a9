// Cooperative control loop
//
// A single task owns the session and the serial link. Each tracking tick it
// drains operator commands and firmware lines (non-blocking), then advances
// the tracking estimator. Status is published on its own, slower tick.
// Every per-cycle failure becomes a diagnostic event; nothing here is fatal.

use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::astro::{AnalyticEphemeris, AtmosphericParams, Ephemeris, ObserverLocation};
use crate::config::{Args, TOPIC_CMD_OPERATOR, TOPIC_EVENTS, TOPIC_STATUS};
use crate::control::{Session, SessionError, Site, TargetSpec, TrackOutcome};
use crate::link::{CommandSink, LineStream, LinkEvent, LinkWriter, SerialLink, TransportError};
use crate::messages::{MountStatus, OperatorCommand, RuntimeEvent};

/// Sink used while no serial link is open
struct Offline;

impl CommandSink for Offline {
    fn send(&mut self, _bytes: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::PortClosed)
    }
}

/// Run `f` against the open link, or against a sink that refuses everything
fn with_sink<R>(
    writer: &mut Option<LinkWriter>,
    f: impl FnOnce(&mut dyn CommandSink) -> R,
) -> R {
    match writer {
        Some(writer) => f(writer),
        None => f(&mut Offline),
    }
}

struct Connection {
    link: SerialLink,
    lines: LineStream,
}

pub struct Runtime<E: Ephemeris> {
    session: Session,
    ephemeris: E,
    connection: Option<Connection>,
    writer: Option<LinkWriter>,
    default_baud: u32,
    outbox: Vec<RuntimeEvent>,
}

impl<E: Ephemeris> Runtime<E> {
    pub fn new(session: Session, ephemeris: E, default_baud: u32) -> Self {
        Self {
            session,
            ephemeris,
            connection: None,
            writer: None,
            default_baud,
            outbox: Vec::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Events produced since the last call
    pub fn take_events(&mut self) -> Vec<RuntimeEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn emit(&mut self, event: RuntimeEvent) {
        self.outbox.push(event);
    }

    fn diagnostic(&mut self, message: String) {
        warn!("{}", message);
        self.emit(RuntimeEvent::Diagnostic { message });
    }

    /// Open a serial port, replacing any current link
    pub fn connect(&mut self, port: &str, baud: u32) {
        self.disconnect();
        match SerialLink::open(port, baud) {
            Ok((link, lines)) => self.attach(link, lines),
            Err(e) => {
                error!("Failed to open {}: {}", port, e);
                self.emit(RuntimeEvent::LinkFault {
                    message: format!("{}: {}", port, e),
                });
            }
        }
    }

    /// Take ownership of an already-running link
    pub fn attach(&mut self, link: SerialLink, lines: LineStream) {
        self.disconnect();
        info!("Serial link {} connected", link.port_name());
        self.emit(RuntimeEvent::LinkOpened {
            port: link.port_name().to_string(),
        });
        self.writer = Some(link.writer());
        self.connection = Some(Connection { link, lines });
    }

    pub fn disconnect(&mut self) {
        self.writer = None;
        if let Some(connection) = self.connection.take() {
            let port = connection.link.port_name().to_string();
            connection.link.close();
            self.emit(RuntimeEvent::LinkClosed { port });
        }
    }

    /// Handle one operator request
    pub fn on_command(&mut self, command: OperatorCommand, now: DateTime<Utc>) {
        debug!("Operator command: {:?}", command);
        match command {
            OperatorCommand::Connect { port, baud } => {
                let baud = baud.unwrap_or(self.default_baud);
                self.connect(&port, baud);
            }
            OperatorCommand::Disconnect => self.disconnect(),
            OperatorCommand::Goto => self.goto(now),
            OperatorCommand::Track { enabled } => self.set_tracking(enabled),
            OperatorCommand::ToggleTrack => self.set_tracking(!self.session.is_tracking()),
            OperatorCommand::Zero => {
                let result = with_sink(&mut self.writer, |sink| self.session.zero(sink));
                match result {
                    Ok(()) => self.emit(RuntimeEvent::Zeroed),
                    Err(e) => self.diagnostic(format!("ZERO failed: {}", e)),
                }
            }
            OperatorCommand::SetTarget { body } => {
                let was_tracking = self.session.is_tracking();
                let result = with_sink(&mut self.writer, |sink| self.session.set_body(body, sink));
                self.after_change(was_tracking, result);
            }
            OperatorCommand::SetTime { time } => {
                let was_tracking = self.session.is_tracking();
                let result = with_sink(&mut self.writer, |sink| self.session.set_time(time, sink));
                self.after_change(was_tracking, result);
            }
            OperatorCommand::SetLocation {
                latitude,
                longitude,
                elevation,
            } => match ObserverLocation::new(latitude, longitude, elevation) {
                Ok(location) => {
                    let was_tracking = self.session.is_tracking();
                    let result = with_sink(&mut self.writer, |sink| {
                        self.session.set_location(location, sink)
                    });
                    self.after_change(was_tracking, result);
                }
                Err(e) => self.diagnostic(format!("Location rejected: {}", e)),
            },
            OperatorCommand::SetAtmosphere {
                enabled,
                temperature,
                pressure,
            } => {
                let atmosphere = if enabled {
                    match AtmosphericParams::parse(&temperature, &pressure) {
                        Ok(params) => Some(params),
                        Err(e) => {
                            self.diagnostic(format!("{}, refraction disabled", e));
                            None
                        }
                    }
                } else {
                    None
                };
                let was_tracking = self.session.is_tracking();
                let result = with_sink(&mut self.writer, |sink| {
                    self.session.set_atmosphere(atmosphere, sink)
                });
                self.after_change(was_tracking, result);
            }
        }
    }

    fn goto(&mut self, now: DateTime<Utc>) {
        let result = with_sink(&mut self.writer, |sink| {
            self.session.goto(&self.ephemeris, sink, now)
        });
        match result {
            Ok(plan) => {
                let command = plan.command().to_string();
                info!("{}", command);
                self.emit(RuntimeEvent::GotoIssued { command });
            }
            Err(e @ SessionError::Pointing(_)) => {
                info!("GOTO rejected: {}", e);
                self.emit(RuntimeEvent::GotoRejected { reason: e.to_string() });
            }
            Err(e) => self.diagnostic(format!("GOTO failed: {}", e)),
        }
    }

    fn set_tracking(&mut self, enabled: bool) {
        if enabled == self.session.is_tracking() {
            return;
        }
        if enabled {
            self.session.start_tracking();
        } else if let Err(e) =
            with_sink(&mut self.writer, |sink| self.session.stop_tracking(sink))
        {
            self.diagnostic(format!("STOP not sent: {}", e));
        }
        self.emit(RuntimeEvent::Tracking { enabled });
    }

    /// Changing what is tracked halts tracking; report it
    fn after_change(&mut self, was_tracking: bool, result: Result<(), SessionError>) {
        if was_tracking && !self.session.is_tracking() {
            self.emit(RuntimeEvent::Tracking { enabled: false });
        }
        if let Err(e) = result {
            self.diagnostic(format!("STOP not sent: {}", e));
        }
    }

    /// Forward everything the reader has decoded so far
    pub fn drain_link(&mut self) {
        let mut fault = None;
        if let Some(connection) = self.connection.as_mut() {
            while let Some(event) = connection.lines.try_next() {
                match event {
                    LinkEvent::Line(line) => {
                        info!("Mount -> {}", line);
                        self.outbox.push(RuntimeEvent::SerialLine { line });
                    }
                    LinkEvent::Fault(message) => {
                        fault = Some(message);
                        break;
                    }
                }
            }
        }

        if let Some(message) = fault {
            self.emit(RuntimeEvent::LinkFault { message });
            self.disconnect();
        }
    }

    /// One tracking tick
    pub fn on_track_tick(&mut self, now: DateTime<Utc>) {
        if !self.session.is_tracking() {
            return;
        }
        if self.writer.is_none() {
            debug!("Tracking enabled but no serial link, skipping tick");
            return;
        }

        let result = with_sink(&mut self.writer, |sink| {
            self.session.tick(&self.ephemeris, sink, now)
        });
        match result {
            Ok(TrackOutcome::Velocity(velocity)) => self.emit(RuntimeEvent::TrackFrameSent {
                azimuth_dps: velocity.azimuth_dps,
                altitude_dps: velocity.altitude_dps,
            }),
            Ok(_) => {}
            Err(e) => self.diagnostic(format!("Tracking tick skipped: {}", e)),
        }
    }

    /// Snapshot for the status topic
    pub fn status(&self, now: DateTime<Utc>) -> MountStatus {
        let target_position = match self.session.observe(&self.ephemeris, now) {
            Ok(position) => Some(position),
            Err(e) => {
                debug!("No position for status: {}", e);
                None
            }
        };

        MountStatus {
            link: self
                .connection
                .as_ref()
                .map(|connection| connection.link.port_name().to_string()),
            tracking: self.session.is_tracking(),
            target: self.session.target().body,
            time: self.session.target().time,
            refraction: self.session.site().atmosphere.is_some(),
            target_position,
            mount: *self.session.mount(),
        }
    }

    /// Status as a bus payload
    pub fn status_payload(&self, now: DateTime<Utc>) -> Option<String> {
        match serde_json::to_string(&self.status(now)) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!("Failed to serialize status: {}", e);
                None
            }
        }
    }

    /// Pending events as bus payloads, emptying the outbox
    pub fn event_payloads(&mut self) -> Vec<String> {
        self.take_events()
            .iter()
            .filter_map(|event| match serde_json::to_string(event) {
                Ok(json) => Some(json),
                Err(e) => {
                    warn!("Failed to serialize event {:?}: {}", event, e);
                    None
                }
            })
            .collect()
    }

    /// Stop tracking and close the link
    pub fn shutdown(&mut self) {
        if self.session.is_tracking() {
            self.set_tracking(false);
        }
        self.disconnect();
    }
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let site = Site {
        location: args.location()?,
        atmosphere: args.atmosphere(),
    };
    let session = Session::new(site, TargetSpec::now(args.body));
    let mut runtime = Runtime::new(session, AnalyticEphemeris::new(), args.baud);

    if let Some(port) = &args.port {
        runtime.connect(port, args.baud);
    }

    info!("Opening Zenoh session...");
    let bus = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = bus.declare_subscriber(TOPIC_CMD_OPERATOR).await?;
    let pub_status = bus.declare_publisher(TOPIC_STATUS).await?;
    let pub_events = bus.declare_publisher(TOPIC_EVENTS).await?;

    let mut track_tick = interval(args.track_interval());
    let mut status_tick = interval(args.status_interval());
    // A late tick must not be replayed as a burst of frames
    track_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    status_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Runtime started: {}ms track tick, {}ms status",
        args.track_interval().as_millis(),
        args.status_interval().as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD_OPERATOR);
    info!("Publishing to: {}, {}", TOPIC_STATUS, TOPIC_EVENTS);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut running = true;

    while running {
        tokio::select! {
            _ = track_tick.tick() => {
                // 1. Drain all pending operator commands (non-blocking)
                while let Ok(Some(sample)) = subscriber.try_recv() {
                    let payload = sample.payload().to_bytes();
                    match serde_json::from_slice::<OperatorCommand>(&payload) {
                        Ok(command) => runtime.on_command(command, Utc::now()),
                        Err(e) => warn!("Failed to parse operator command: {}", e),
                    }
                }

                // 2. Forward firmware lines
                runtime.drain_link();

                // 3. Tracking
                runtime.on_track_tick(Utc::now());
            }
            _ = status_tick.tick() => {
                if let Some(status_json) = runtime.status_payload(Utc::now()) {
                    if let Err(e) = pub_status.put(status_json).await {
                        warn!("Failed to publish status: {}", e);
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                runtime.shutdown();
                running = false;
            }
        }

        // 4. Publish events
        // Bus failures past setup are logged, never fatal
        for event_json in runtime.event_payloads() {
            if let Err(e) = pub_events.put(event_json).await {
                warn!("Failed to publish event: {}", e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::astro::Body;
    use crate::control::testing::{site, ScriptedEphemeris};
    use crate::control::MountState;
    use crate::link::transport::SerialIo;
    use crate::link::TrackFrame;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct MockPort {
        incoming: Arc<Mutex<VecDeque<u8>>>,
        written: Arc<Mutex<Vec<u8>>>,
        broken: Arc<Mutex<bool>>,
    }

    impl MockPort {
        fn feed(&self, bytes: &[u8]) {
            self.incoming.lock().unwrap().extend(bytes);
        }

        fn written(&self) -> Vec<u8> {
            self.written.lock().unwrap().clone()
        }

        fn unplug(&self) {
            *self.broken.lock().unwrap() = true;
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut incoming = self.incoming.lock().unwrap();
            let n = incoming.len().min(buf.len());
            for (slot, byte) in buf.iter_mut().zip(incoming.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialIo for MockPort {
        fn bytes_available(&mut self) -> io::Result<usize> {
            if *self.broken.lock().unwrap() {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            Ok(self.incoming.lock().unwrap().len())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 23, 0, 0).unwrap()
    }

    fn runtime(positions: &[(f64, f64)]) -> Runtime<ScriptedEphemeris> {
        let session = Session::new(site(), TargetSpec::now(Body::Moon));
        Runtime::new(session, ScriptedEphemeris::new(positions), 9600)
    }

    fn connected(positions: &[(f64, f64)]) -> (Runtime<ScriptedEphemeris>, MockPort) {
        let port = MockPort::default();
        let (link, lines) =
            SerialLink::spawn("mock", Box::new(port.clone()), Duration::from_millis(1)).unwrap();
        let mut runtime = runtime(positions);
        runtime.attach(link, lines);
        assert_eq!(
            runtime.take_events(),
            vec![RuntimeEvent::LinkOpened { port: "mock".into() }]
        );
        (runtime, port)
    }

    /// Drain the link until at least `count` events are queued
    fn drain_events(runtime: &mut Runtime<ScriptedEphemeris>, count: usize) -> Vec<RuntimeEvent> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut events = Vec::new();
        while events.len() < count && Instant::now() < deadline {
            runtime.drain_link();
            events.extend(runtime.take_events());
            std::thread::sleep(Duration::from_millis(2));
        }
        events
    }

    #[test]
    fn test_goto_without_link_is_diagnostic() {
        let mut runtime = runtime(&[(120.0, 30.0)]);
        runtime.on_command(OperatorCommand::Goto, t0());

        let events = runtime.take_events();
        assert!(matches!(events.as_slice(), [RuntimeEvent::Diagnostic { .. }]));
        assert_eq!(*runtime.session().mount(), MountState::default());
    }

    #[test]
    fn test_goto_below_horizon_is_rejected() {
        let (mut runtime, port) = connected(&[(120.0, -5.0)]);
        runtime.on_command(OperatorCommand::Goto, t0());

        assert!(matches!(
            runtime.take_events().as_slice(),
            [RuntimeEvent::GotoRejected { .. }]
        ));
        assert!(port.written().is_empty());
    }

    #[test]
    fn test_goto_writes_command_and_updates_status() {
        let (mut runtime, port) = connected(&[(350.0, 6.0)]);
        runtime.on_command(OperatorCommand::Goto, t0());

        assert_eq!(
            runtime.take_events(),
            vec![RuntimeEvent::GotoIssued {
                command: "GOTO AZ=-10.00 ALT=6.00".into()
            }]
        );
        assert_eq!(port.written(), b"GOTO AZ=-10.00 ALT=6.00\n".to_vec());

        let status = runtime.status(t0());
        assert_eq!(status.link.as_deref(), Some("mock"));
        assert_eq!(status.mount.azimuth_deg, 350.0);
    }

    #[test]
    fn test_track_ticks_skipped_without_link() {
        let mut runtime = runtime(&[(10.0, 20.0), (10.0085, 19.9965)]);
        runtime.on_command(OperatorCommand::Track { enabled: true }, t0());
        assert_eq!(runtime.take_events(), vec![RuntimeEvent::Tracking { enabled: true }]);

        runtime.on_track_tick(t0());
        runtime.on_track_tick(t0() + chrono::Duration::seconds(1));
        assert!(runtime.take_events().is_empty());
        assert!(runtime.session().is_tracking());
    }

    #[test]
    fn test_tracking_sends_frames() {
        let (mut runtime, port) = connected(&[(10.0, 20.0), (10.0085, 19.9965)]);
        runtime.on_command(OperatorCommand::ToggleTrack, t0());
        runtime.take_events();

        runtime.on_track_tick(t0());
        assert!(port.written().is_empty());
        runtime.on_track_tick(t0() + chrono::Duration::seconds(1));

        let events = runtime.take_events();
        assert!(matches!(events.as_slice(), [RuntimeEvent::TrackFrameSent { .. }]));
        let frame = TrackFrame::decode(&port.written()).unwrap();
        assert_eq!(frame.azimuth_mdps, 8);
        assert_eq!(frame.altitude_mdps, -3);
    }

    #[test]
    fn test_retarget_while_tracking_stops() {
        let (mut runtime, port) = connected(&[(10.0, 20.0)]);
        runtime.on_command(OperatorCommand::Track { enabled: true }, t0());
        runtime.take_events();

        runtime.on_command(OperatorCommand::SetTarget { body: Body::Mars }, t0());
        assert_eq!(runtime.take_events(), vec![RuntimeEvent::Tracking { enabled: false }]);
        assert_eq!(port.written(), b"STOP\n".to_vec());
        assert_eq!(runtime.status(t0()).target, Body::Mars);
    }

    #[test]
    fn test_malformed_atmosphere_disables_refraction() {
        let mut runtime = runtime(&[(10.0, 20.0)]);
        runtime.on_command(
            OperatorCommand::SetAtmosphere {
                enabled: true,
                temperature: "warm".into(),
                pressure: "1013".into(),
            },
            t0(),
        );
        assert!(matches!(
            runtime.take_events().as_slice(),
            [RuntimeEvent::Diagnostic { .. }]
        ));
        assert!(!runtime.status(t0()).refraction);

        runtime.on_command(
            OperatorCommand::SetAtmosphere {
                enabled: true,
                temperature: "-2".into(),
                pressure: "990".into(),
            },
            t0(),
        );
        assert!(runtime.take_events().is_empty());
        assert!(runtime.status(t0()).refraction);
    }

    #[test]
    fn test_invalid_location_is_ignored() {
        let mut runtime = runtime(&[(10.0, 20.0)]);
        let before = runtime.session().site().location;
        runtime.on_command(
            OperatorCommand::SetLocation {
                latitude: 123.0,
                longitude: 0.0,
                elevation: 0.0,
            },
            t0(),
        );
        assert!(matches!(
            runtime.take_events().as_slice(),
            [RuntimeEvent::Diagnostic { .. }]
        ));
        assert_eq!(runtime.session().site().location, before);
    }

    #[test]
    fn test_firmware_lines_are_forwarded() {
        let (mut runtime, port) = connected(&[(10.0, 20.0)]);
        port.feed(b"OK\r\nPOS AZ=10.00 ALT=20.00\n");

        let events = drain_events(&mut runtime, 2);
        assert_eq!(
            events,
            vec![
                RuntimeEvent::SerialLine { line: "OK".into() },
                RuntimeEvent::SerialLine {
                    line: "POS AZ=10.00 ALT=20.00".into()
                },
            ]
        );
    }

    #[test]
    fn test_link_fault_drops_connection() {
        let (mut runtime, port) = connected(&[(10.0, 20.0)]);
        port.unplug();

        let events = drain_events(&mut runtime, 2);
        assert!(matches!(events[0], RuntimeEvent::LinkFault { .. }));
        assert_eq!(events[1], RuntimeEvent::LinkClosed { port: "mock".into() });
        assert!(!runtime.is_connected());
        assert_eq!(runtime.status(t0()).link, None);
    }

    #[test]
    fn test_shutdown_stops_tracking_and_closes() {
        let (mut runtime, port) = connected(&[(10.0, 20.0)]);
        runtime.on_command(OperatorCommand::Track { enabled: true }, t0());
        runtime.take_events();

        runtime.shutdown();
        assert_eq!(
            runtime.take_events(),
            vec![
                RuntimeEvent::Tracking { enabled: false },
                RuntimeEvent::LinkClosed { port: "mock".into() },
            ]
        );
        assert_eq!(port.written(), b"STOP\n".to_vec());
        assert!(!runtime.is_connected());
    }

    #[test]
    fn test_bus_payloads() {
        let (mut runtime, _port) = connected(&[(120.0, 30.0)]);
        runtime.on_command(OperatorCommand::Track { enabled: true }, t0());
        runtime.on_command(OperatorCommand::SetTarget { body: Body::Mars }, t0());

        let payloads = runtime.event_payloads();
        assert_eq!(
            payloads,
            vec![
                r#"{"event":"tracking","enabled":true}"#.to_string(),
                r#"{"event":"tracking","enabled":false}"#.to_string(),
            ]
        );
        assert!(runtime.event_payloads().is_empty());

        let status: MountStatus =
            serde_json::from_str(&runtime.status_payload(t0()).unwrap()).unwrap();
        assert_eq!(status.link.as_deref(), Some("mock"));
        assert_eq!(status.target, Body::Mars);
        assert!(!status.tracking);
        assert_eq!(status.target_position.unwrap().altitude_deg, 30.0);
    }

    #[test]
    fn test_connect_failure_is_reported() {
        let mut runtime = runtime(&[(10.0, 20.0)]);
        runtime.on_command(
            OperatorCommand::Connect {
                port: "/dev/does-not-exist-altaz".into(),
                baud: None,
            },
            t0(),
        );
        assert!(matches!(
            runtime.take_events().as_slice(),
            [RuntimeEvent::LinkFault { .. }]
        ));
        assert!(!runtime.is_connected());
    }
}
