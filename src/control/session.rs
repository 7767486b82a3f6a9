// Session context for the control core
//
// Owns every piece of mutable control state (site, target, mount state,
// tracking flag and estimator). Operations route their output through a
// `CommandSink`; the mount state only changes once a command was accepted
// for transmission.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::pointing::{compute_goto, GotoPlan, MountState, PointingError};
use super::tracking::{TrackOutcome, TrackingEstimator};
use super::{Site, TargetSpec, TimeSelection};
use crate::astro::{
    ApparentPosition, AtmosphericParams, Body, Ephemeris, EphemerisError, ObserverLocation,
};
use crate::link::{protocol, CommandSink, FrameError, Quantization, TextCommand, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Pointing(#[from] PointingError),

    #[error("no position available: {0}")]
    Ephemeris(#[from] EphemerisError),

    #[error("track frame not encodable: {0}")]
    Frame(#[from] FrameError),

    #[error("command not sent: {0}")]
    Transport(#[from] TransportError),
}

pub struct Session {
    site: Site,
    target: TargetSpec,
    mount: MountState,
    tracking: bool,
    estimator: TrackingEstimator,
    quantization: Quantization,
}

impl Session {
    pub fn new(site: Site, target: TargetSpec) -> Self {
        Self {
            site,
            target,
            mount: MountState::default(),
            tracking: false,
            estimator: TrackingEstimator::new(),
            quantization: Quantization::default(),
        }
    }

    pub fn with_quantization(mut self, quantization: Quantization) -> Self {
        self.quantization = quantization;
        self
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn target(&self) -> &TargetSpec {
        &self.target
    }

    pub fn mount(&self) -> &MountState {
        &self.mount
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Current apparent position of the target, for display
    pub fn observe(
        &self,
        ephemeris: &dyn Ephemeris,
        now: DateTime<Utc>,
    ) -> Result<ApparentPosition, EphemerisError> {
        self.site.observe(ephemeris, &self.target, now)
    }

    /// Point the mount at the target
    pub fn goto(
        &mut self,
        ephemeris: &dyn Ephemeris,
        sink: &mut dyn CommandSink,
        now: DateTime<Utc>,
    ) -> Result<GotoPlan, SessionError> {
        let plan = compute_goto(ephemeris, &self.target, &self.site, &self.mount, now)?;
        sink.send(&plan.command().encode())?;
        plan.commit(&mut self.mount);
        Ok(plan)
    }

    /// Declare the current mount orientation as (0°, 0°)
    pub fn zero(&mut self, sink: &mut dyn CommandSink) -> Result<(), SessionError> {
        sink.send(&TextCommand::Zero.encode())?;
        self.mount = MountState::default();
        info!("Mount zeroed");
        Ok(())
    }

    /// Enable tracking; always starts from an empty baseline
    pub fn start_tracking(&mut self) {
        self.estimator.reset();
        self.tracking = true;
        info!("Tracking enabled for {}", self.target.body);
    }

    /// Disable tracking and tell the mount to stop
    ///
    /// Tracking is off even if STOP could not be sent.
    pub fn stop_tracking(&mut self, sink: &mut dyn CommandSink) -> Result<(), SessionError> {
        self.tracking = false;
        self.estimator.reset();
        info!("Tracking disabled");
        sink.send(&TextCommand::Stop.encode())?;
        Ok(())
    }

    /// One periodic tracking tick
    pub fn tick(
        &mut self,
        ephemeris: &dyn Ephemeris,
        sink: &mut dyn CommandSink,
        now: DateTime<Utc>,
    ) -> Result<TrackOutcome, SessionError> {
        if !self.tracking {
            return Ok(TrackOutcome::Disabled);
        }

        let outcome = self.estimator.step(ephemeris, &self.target, &self.site, now)?;
        match outcome {
            TrackOutcome::Velocity(velocity) => {
                let frame = protocol::encode_track(velocity, self.quantization)?;
                sink.send(&frame)?;
                self.estimator.commit();
                debug!(
                    "TRACK VAZ={:+.6} °/s VALT={:+.6} °/s",
                    velocity.azimuth_dps, velocity.altitude_dps
                );
            }
            TrackOutcome::BelowHorizon { altitude } => {
                debug!("Tracking paused, target at {:.2}°", altitude);
            }
            TrackOutcome::Noise(velocity) => {
                debug!(
                    "Below noise threshold ({:+.6}, {:+.6} °/s), no frame",
                    velocity.azimuth_dps, velocity.altitude_dps
                );
            }
            TrackOutcome::ClockStall => debug!("Clock did not advance, no frame"),
            TrackOutcome::Armed | TrackOutcome::Disabled => {}
        }
        Ok(outcome)
    }

    /// Change body. Stops tracking first, since the baseline would no longer apply.
    pub fn set_body(&mut self, body: Body, sink: &mut dyn CommandSink) -> Result<(), SessionError> {
        let result = self.halt_for_change("target changed", sink);
        self.target.body = body;
        info!("Target set to {}", body);
        result
    }

    pub fn set_time(
        &mut self,
        time: TimeSelection,
        sink: &mut dyn CommandSink,
    ) -> Result<(), SessionError> {
        let result = self.halt_for_change("time selection changed", sink);
        self.target.time = time;
        info!("Time selection set to {:?}", time);
        result
    }

    pub fn set_location(
        &mut self,
        location: ObserverLocation,
        sink: &mut dyn CommandSink,
    ) -> Result<(), SessionError> {
        let result = self.halt_for_change("location changed", sink);
        self.site.location = location;
        info!(
            "Location set to lat {:.6}° lon {:.6}° elev {:.0} m",
            location.latitude_deg(),
            location.longitude_deg(),
            location.elevation_m()
        );
        result
    }

    pub fn set_atmosphere(
        &mut self,
        atmosphere: Option<AtmosphericParams>,
        sink: &mut dyn CommandSink,
    ) -> Result<(), SessionError> {
        let result = self.halt_for_change("atmosphere changed", sink);
        self.site.atmosphere = atmosphere;
        match atmosphere {
            Some(params) => info!(
                "Refraction on: {:.1} °C, {:.1} mbar",
                params.temperature_c, params.pressure_mbar
            ),
            None => info!("Refraction off"),
        }
        result
    }

    fn halt_for_change(
        &mut self,
        reason: &str,
        sink: &mut dyn CommandSink,
    ) -> Result<(), SessionError> {
        if !self.tracking {
            return Ok(());
        }
        warn!("Stopping tracking: {}", reason);
        self.stop_tracking(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::testing::{site, RecordingSink, ScriptedEphemeris};
    use crate::link::TrackFrame;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 23, 0, 0).unwrap()
    }

    fn session() -> Session {
        Session::new(site(), TargetSpec::now(Body::Moon))
    }

    #[test]
    fn test_goto_sends_and_commits() {
        let mut session = session();
        session.mount = MountState {
            azimuth_deg: 10.0,
            altitude_deg: 5.0,
        };
        let eph = ScriptedEphemeris::new(&[(350.0, 6.0)]);
        let mut sink = RecordingSink::default();

        let plan = session.goto(&eph, &mut sink, t0()).unwrap();
        assert_eq!(plan.azimuth_deg, -10.0);
        assert_eq!(sink.frames, vec![b"GOTO AZ=-10.00 ALT=6.00\n".to_vec()]);
        assert_eq!(
            *session.mount(),
            MountState {
                azimuth_deg: 350.0,
                altitude_deg: 6.0
            }
        );
    }

    #[test]
    fn test_goto_below_horizon_changes_nothing() {
        let mut session = session();
        let eph = ScriptedEphemeris::new(&[(120.0, -3.0)]);
        let mut sink = RecordingSink::default();

        let err = session.goto(&eph, &mut sink, t0()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Pointing(PointingError::BelowHorizon { .. })
        ));
        assert!(sink.frames.is_empty());
        assert_eq!(*session.mount(), MountState::default());
    }

    #[test]
    fn test_goto_on_closed_port_keeps_state() {
        let mut session = session();
        let eph = ScriptedEphemeris::new(&[(120.0, 30.0)]);
        let mut sink = RecordingSink {
            closed: true,
            ..Default::default()
        };

        let err = session.goto(&eph, &mut sink, t0()).unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::PortClosed)));
        assert_eq!(*session.mount(), MountState::default());
    }

    #[test]
    fn test_zero_resets_mount() {
        let mut session = session();
        session.mount = MountState {
            azimuth_deg: 200.0,
            altitude_deg: 40.0,
        };
        let mut sink = RecordingSink::default();
        session.zero(&mut sink).unwrap();
        assert_eq!(*session.mount(), MountState::default());
        assert_eq!(sink.frames, vec![b"ZERO\n".to_vec()]);
    }

    #[test]
    fn test_tick_disabled_does_nothing() {
        let mut session = session();
        let eph = ScriptedEphemeris::new(&[(10.0, 20.0)]);
        let mut sink = RecordingSink::default();
        assert_eq!(session.tick(&eph, &mut sink, t0()).unwrap(), TrackOutcome::Disabled);
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn test_tracking_emits_binary_frame() {
        let mut session = session();
        let eph = ScriptedEphemeris::new(&[(10.0, 20.0), (10.0085, 19.9965)]);
        let mut sink = RecordingSink::default();

        session.start_tracking();
        assert_eq!(session.tick(&eph, &mut sink, t0()).unwrap(), TrackOutcome::Armed);
        assert!(sink.frames.is_empty());

        let outcome = session.tick(&eph, &mut sink, t0() + Duration::seconds(1)).unwrap();
        assert!(matches!(outcome, TrackOutcome::Velocity(_)));
        assert_eq!(sink.frames.len(), 1);

        let frame = TrackFrame::decode(&sink.frames[0]).unwrap();
        // 8.5 and -3.5 milli-degrees/second, truncated toward zero
        assert_eq!(frame.azimuth_mdps, 8);
        assert_eq!(frame.altitude_mdps, -3);
    }

    #[test]
    fn test_overflowing_velocity_is_reported() {
        let mut session = session();
        let eph = ScriptedEphemeris::new(&[(10.0, 20.0), (10.0, 60.0)]);
        let mut sink = RecordingSink::default();

        session.start_tracking();
        session.tick(&eph, &mut sink, t0()).unwrap();
        let err = session
            .tick(&eph, &mut sink, t0() + Duration::microseconds(1))
            .unwrap_err();
        assert!(matches!(err, SessionError::Frame(FrameError::Overflow { .. })));
        assert!(sink.frames.is_empty());
        assert_eq!(session.estimator.baseline().unwrap().timestamp, t0());
    }

    #[test]
    fn test_failed_send_keeps_tracking_baseline() {
        let mut session = session();
        let eph = ScriptedEphemeris::new(&[(10.0, 20.0), (10.01, 20.0), (10.02, 20.0)]);
        let mut sink = RecordingSink::default();

        session.start_tracking();
        session.tick(&eph, &mut sink, t0()).unwrap();

        sink.closed = true;
        let err = session
            .tick(&eph, &mut sink, t0() + Duration::seconds(1))
            .unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::PortClosed)));
        assert_eq!(session.estimator.baseline().unwrap().timestamp, t0());
        assert!(session.is_tracking());

        // Once the link accepts frames, velocity spans the whole gap
        sink.closed = false;
        let outcome = session
            .tick(&eph, &mut sink, t0() + Duration::seconds(2))
            .unwrap();
        let TrackOutcome::Velocity(v) = outcome else {
            panic!("expected velocity, got {:?}", outcome);
        };
        assert!((v.azimuth_dps - 0.01).abs() < 1e-9);
        assert_eq!(
            session.estimator.baseline().unwrap().timestamp,
            t0() + Duration::seconds(2)
        );
    }

    #[test]
    fn test_stop_tracking_sends_stop_and_disarms() {
        let mut session = session();
        let eph = ScriptedEphemeris::new(&[(10.0, 20.0)]);
        let mut sink = RecordingSink::default();

        session.start_tracking();
        session.tick(&eph, &mut sink, t0()).unwrap();
        session.stop_tracking(&mut sink).unwrap();
        assert!(!session.is_tracking());
        assert_eq!(sink.frames, vec![b"STOP\n".to_vec()]);

        // Re-enabling starts from Idle
        session.start_tracking();
        assert_eq!(
            session.tick(&eph, &mut sink, t0() + Duration::seconds(5)).unwrap(),
            TrackOutcome::Armed
        );
    }

    #[test]
    fn test_changing_target_while_tracking_stops() {
        let mut session = session();
        let mut sink = RecordingSink::default();

        session.start_tracking();
        session.set_body(Body::Mars, &mut sink).unwrap();
        assert!(!session.is_tracking());
        assert_eq!(session.target().body, Body::Mars);
        assert_eq!(sink.frames, vec![b"STOP\n".to_vec()]);

        // Not tracking: no STOP
        session.set_body(Body::Venus, &mut sink).unwrap();
        assert_eq!(sink.frames.len(), 1);
    }

    #[test]
    fn test_setters_apply_even_when_stop_fails() {
        let mut session = session();
        let mut sink = RecordingSink {
            closed: true,
            ..Default::default()
        };
        session.start_tracking();
        let location = ObserverLocation::new(51.5, 0.0, 20.0).unwrap();
        assert!(session.set_location(location, &mut sink).is_err());
        assert_eq!(session.site().location, location);
        assert!(!session.is_tracking());
    }
}
