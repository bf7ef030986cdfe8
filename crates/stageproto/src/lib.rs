//! stageproto - talking to a live DAW session over OSC
//!
//! The control surface listens for OSC on UDP and answers queries by sending
//! a message back to our reply port on the same address it was asked. There
//! is no request id, no ordering and no delivery guarantee, so this crate
//! turns "ask and wait" into something callers can rely on:
//!
//! - `osc` - OSC 1.0 message and bundle codec
//! - `transport` - UDP send plus a background listener with explicit shutdown
//! - `correlator` - latest reply per topic, bounded read-then-clear waits
//! - `query` - single queries and composite snapshots (tracks, clips, devices)
//! - `commands` - the fire-and-forget command vocabulary
//! - `tempo` / `link` - BPM sources, including a Carabiner (Ableton Link) client
//! - `session` - everything above wired together with one owner
//!
//! ```ignore
//! let session = LiveSession::connect(&config.osc).await?;
//! let tracks = session.query_engine().get_all_tracks().await;
//! session.send(LiveCommand::SetSolo { track: 0, on: true }).await?;
//! session.shutdown().await?;
//! ```

pub mod commands;
pub mod correlator;
pub mod link;
pub mod osc;
pub mod query;
pub mod session;
pub mod snapshot;
pub mod tempo;
pub mod topics;
pub mod transport;

pub use commands::{parse_cli_arg, LiveCommand};
pub use correlator::{Correlator, PendingReply, QueryResult};
pub use link::{LinkClient, LinkError};
pub use osc::{decode_packet, encode_bundle, OscArg, OscError, OscMessage, Payload};
pub use query::QueryEngine;
pub use session::LiveSession;
pub use snapshot::{ClipSnapshot, DeviceSnapshot, ParameterSnapshot, SessionSnapshot, TrackSnapshot};
pub use tempo::{FallbackTempo, FixedTempo, SessionTempo, TempoSource};
pub use transport::{InboundHandler, Listener, Transport, TransportError, UdpTransport};
