// Alt-azimuth mount control runtime
//
// Provides:
// - astro: bodies, observer site and the analytic ephemeris
// - control: GOTO planning, tracking estimation and the session state
// - link: wire protocol and serial transport to the mount firmware
// - runtime: the bus-driven control loop

pub mod astro;
pub mod config;
pub mod control;
pub mod link;
pub mod messages;
pub mod runtime;
