//! Live session demo
//!
//! Streams the camera to an analysis service and prints every result it sends
//! back. Pass `--synthetic` to stream a test pattern instead of a real camera.
//!
//! ```text
//! cargo run --example live_session -- --endpoint ws://localhost:8000/ws/live --exercise squat
//! ```

use clap::Parser;
use livecoach::{
    init_logging, DetectionMode, SessionEvent, SessionState, StreamingSession,
    SyntheticCaptureBackend, DEFAULT_ENDPOINT, DEFAULT_TICK_INTERVAL,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "live_session", about = "Stream a camera to an exercise analysis service")]
struct Args {
    /// Service endpoint, without the query string
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Exercise to analyse (squat, pushup, bicep_curl, ...) or "auto"
    #[arg(long, default_value = "auto")]
    exercise: String,

    /// Stream a synthetic test pattern instead of the camera
    #[arg(long)]
    synthetic: bool,

    /// Stop after this many seconds; runs until Ctrl-C when omitted
    #[arg(long)]
    seconds: Option<u64>,

    /// Milliseconds between frames
    #[arg(long, default_value_t = DEFAULT_TICK_INTERVAL.as_millis() as u64)]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging("livecoach=info")?;

    let mode: DetectionMode = args.exercise.parse()?;

    let mut builder = StreamingSession::builder()
        .endpoint(&args.endpoint)
        .tick_interval(Duration::from_millis(args.tick_ms));
    if args.synthetic {
        builder = builder.capture_backend(Arc::new(SyntheticCaptureBackend::new()));
    }
    let session = builder.build()?;

    println!("📡 Connecting to {} ({} mode)", args.endpoint, mode);
    if let Err(e) = session.start(mode).await {
        println!("❌ Could not start: {}", e);
        return Ok(());
    }
    println!("✅ Streaming, results follow");

    let mut events = session.events();
    let deadline = async {
        match args.seconds {
            Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::ResultUpdated { result }) => println!("🏋️  {}", result),
                Ok(SessionEvent::ChannelClosed { reason }) => {
                    println!("🔌 Service closed the session: {}", reason);
                }
                Ok(SessionEvent::Error { error, code }) => println!("❌ [{}] {}", code, error),
                Ok(SessionEvent::StateChanged { to, .. }) if to != SessionState::Running => break,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    println!("⚠️  Skipped {} events", skipped);
                }
                Err(_) => break,
            },
        }
    }

    session.stop().await;

    let stats = session.stats();
    println!("\n📊 Session Statistics:");
    println!("   Frames sent: {}", stats.frames_sent);
    println!("   Frames dropped: {}", stats.frames_dropped);
    println!("   Bytes sent: {}", stats.bytes_sent);
    println!("   Ticks skipped: {}", stats.ticks_skipped);
    println!("   Messages received: {}", stats.messages_received);
    println!("   Messages discarded: {}", stats.messages_discarded);

    Ok(())
}
