//! # LiveCoach
//!
//! Streams a camera feed to a remote exercise analysis service and surfaces
//! the service's live feedback: the detected activity, a repetition count and
//! form cues.
//!
//! Frames are sampled from the camera on a fixed tick, compressed to JPEG and
//! pushed over a WebSocket with a latest-effort policy. Results flow back on
//! the same connection and replace the displayed [`LiveResult`] wholesale.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use livecoach::{DetectionMode, StreamingSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = StreamingSession::builder()
//!         .endpoint("ws://localhost:8000/ws/live")
//!         .build()?;
//!
//!     session.start(DetectionMode::Auto).await?;
//!
//!     let mut results = session.subscribe_results();
//!     while results.changed().await.is_ok() {
//!         println!("{}", *results.borrow());
//!     }
//!
//!     session.stop().await;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use livecoach_core::{
    ChannelConfig, ChannelEvent, ChannelEvents, ChannelHandle, ChannelManager, ChannelState,
    ChannelStats, Connector, DetectionMode, ErrorKind, Exercise, InboundStream, LiveCoachError,
    LiveCoachResult, MessageSink, OutboundSink, SendOutcome, WebSocketConnector,
    DEFAULT_ENDPOINT,
};

pub use livecoach_media::{
    CaptureBackend, CaptureConstraints, CaptureEvent, CaptureManager, CaptureStats,
    FrameEncoder, FrameSource, MediaError, RenderSurface, SyntheticCaptureBackend,
    UnavailableBackend, VideoDevice, VideoFrame, VideoPixelFormat, VideoResolution,
};

#[cfg(feature = "native-camera")]
pub use livecoach_media::NativeCameraBackend;

// Public API modules
pub mod config;
pub mod event;
pub mod logging;
pub mod result;
pub mod session;

// Re-export main API types
pub use config::{SessionConfig, DEFAULT_TICK_INTERVAL};
pub use event::SessionEvent;
pub use logging::init_logging;
pub use result::{project, LiveResult};
pub use session::{SessionBuilder, SessionState, SessionStats, StreamingSession};
