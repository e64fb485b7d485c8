//! Connect to a controller, run its startup routine and read back an array.
//!
//! Usage: `cargo run --example startup -- 192.168.1.4`

use std::time::Duration;

use dmclink::{Controller, ControllerConfig, ControllerEvent, Pattern, Subroutine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1".to_string());
    let controller = Controller::new(ControllerConfig::new(host, 23))?;

    let mut events = controller.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let ControllerEvent::Status(status) = event {
                println!("[{}] {}", status.channel, status.status);
            }
        }
    });

    controller.connect().await?;

    let startup = Subroutine::new("Startup", Pattern::regex("^End:Startup$")?)
        .with_error(Pattern::regex("^Error:")?)
        .with_timeout(Duration::from_secs(30))
        .with_transcript(true);
    let execution = controller.execute(&startup).await?;
    for frame in &execution.transcript {
        println!("  {}", frame.text);
    }
    println!("startup finished in {:?}", execution.elapsed);

    controller.download_array("order", &[0.0, 1.0, 2.0]).await?;
    println!("order = {:?}", controller.upload_array("order").await?);

    controller.disconnect().await;
    Ok(())
}
