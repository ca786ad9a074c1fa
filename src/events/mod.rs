//! Event handling for live view sessions
//!
//! This module provides:
//! - `GraphEvent`: enveloped messages from the live source and the host
//! - `ViewSession`: channel-fed loop that applies events to one engine and
//!   publishes the resulting views

mod session;
mod types;

pub use session::ViewSession;
pub use types::{GraphEvent, PositionReport, SourceCommand};
