//! # LiveCoach Core
//!
//! Error taxonomy, wire protocol and channel management for the LiveCoach
//! streaming client. This crate owns the bidirectional connection to the
//! remote analysis service: how it is opened, how frames are pushed through
//! it and how inbound results are handed to the single active consumer.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod error;
pub mod protocol;

// Re-export main types
pub use channel::{
    ChannelConfig, ChannelEvent, ChannelEvents, ChannelHandle, ChannelManager, ChannelState,
    ChannelStats, Connector, InboundStream, MessageSink, OutboundSink, SendOutcome,
    WebSocketConnector,
};
pub use error::{ErrorKind, LiveCoachError, LiveCoachResult};
pub use protocol::{
    endpoint_url, DetectionMode, Exercise, FrameMessage, InboundMessage, DEFAULT_ENDPOINT,
};
