// Link monitor: prints every line the mount firmware sends
//
// Sends STOP once on connect so a mount left moving by a previous session
// halts. Everything else is read-only.
//
// Usage: cargo run --example link_monitor -- [port] [baud]
// Example: cargo run --example link_monitor -- /dev/rfcomm0 9600

use altaz_runtime::link::{LinkEvent, SerialLink, TextCommand, DEFAULT_BAUDRATE};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| "/dev/rfcomm0".to_string());
    let baud = match args.next() {
        Some(baud) => baud.parse()?,
        None => DEFAULT_BAUDRATE,
    };

    println!("Serial port: {} @ {} baud", port, baud);
    println!();

    println!("Step 1: Opening serial port...");
    let (link, mut lines) = match SerialLink::open(&port, baud) {
        Ok(opened) => {
            println!("  ✓ Serial port opened successfully");
            opened
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - For Bluetooth modules, bind the device first (rfcomm bind)");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Sending STOP...");
    match link.writer().send(&TextCommand::Stop.encode()) {
        Ok(()) => println!("  ✓ STOP sent"),
        Err(e) => println!("  ✗ STOP failed: {}", e),
    }
    println!();

    println!("Step 3: Listening (Ctrl-C to quit)...");
    loop {
        tokio::select! {
            event = lines.next() => match event {
                Some(LinkEvent::Line(line)) => println!("  <- {}", line),
                Some(LinkEvent::Fault(message)) => {
                    println!("  ✗ Link fault: {}", message);
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    link.close();
    Ok(())
}
