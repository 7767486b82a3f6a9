// Keyboard operator console: publishes operator commands, prints runtime events
//
// Keys: C=connect, X=disconnect, G=goto, T=toggle tracking, 0=zero,
//       1-7=select body, R=toggle refraction, N=time now, Q=quit
//
// Usage: cargo run --example operator_console -- [port]

use altaz_runtime::astro::Body;
use altaz_runtime::config::{
    DEFAULT_PRESSURE_MBAR, DEFAULT_TEMPERATURE_C, TOPIC_CMD_OPERATOR, TOPIC_EVENTS,
};
use altaz_runtime::control::TimeSelection;
use altaz_runtime::messages::{OperatorCommand, RuntimeEvent};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/rfcomm0".to_string());

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_OPERATOR).await?;
    let events = session.declare_subscriber(TOPIC_EVENTS).await?;

    info!("Controls: C=connect, X=disconnect, G=goto, T=track, 0=zero");
    info!("          1-7=body, R=refraction, N=now, Q=quit");
    for (i, body) in Body::ALL.iter().enumerate() {
        info!("  {} = {}", i + 1, body);
    }

    enable_raw_mode()?;
    let result = run_console(&publisher, &events, &port).await;
    disable_raw_mode()?;

    result
}

async fn run_console(
    publisher: &zenoh::pubsub::Publisher<'_>,
    events: &zenoh::pubsub::Subscriber<zenoh::handlers::FifoChannelHandler<zenoh::sample::Sample>>,
    port: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut refraction = true;

    loop {
        // Print whatever the runtime reported since the last poll
        while let Ok(Some(sample)) = events.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<RuntimeEvent>(&payload) {
                Ok(event) => info!("<- {:?}", event),
                Err(e) => warn!("Unreadable event: {}", e),
            }
        }

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }

        let command = match code {
            KeyCode::Char('c') => OperatorCommand::Connect {
                port: port.to_string(),
                baud: None,
            },
            KeyCode::Char('x') => OperatorCommand::Disconnect,
            KeyCode::Char('g') => OperatorCommand::Goto,
            KeyCode::Char('t') => OperatorCommand::ToggleTrack,
            KeyCode::Char('0') => OperatorCommand::Zero,
            KeyCode::Char('n') => OperatorCommand::SetTime {
                time: TimeSelection::Now,
            },
            KeyCode::Char('r') => {
                refraction = !refraction;
                OperatorCommand::SetAtmosphere {
                    enabled: refraction,
                    temperature: DEFAULT_TEMPERATURE_C.to_string(),
                    pressure: DEFAULT_PRESSURE_MBAR.to_string(),
                }
            }
            KeyCode::Char(c @ '1'..='7') => {
                let index = c as usize - '1' as usize;
                OperatorCommand::SetTarget {
                    body: Body::ALL[index],
                }
            }
            KeyCode::Char('q') | KeyCode::Esc => break,
            _ => continue,
        };

        info!("-> {:?}", command);
        publisher.put(serde_json::to_string(&command)?).await?;
    }

    Ok(())
}
