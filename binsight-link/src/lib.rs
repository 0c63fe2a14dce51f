//! BinSight Link - resilient client connection to the hub
//!
//! Producers and dashboards use this crate instead of talking WebSocket
//! directly: it keeps one connection to a binsight-hub alive, walks a
//! capped backoff ladder when the connection drops, re-joins configured
//! groups after every reconnect (the hub never remembers membership),
//! and hands inbound events to subscribers as typed values.
//!
//! Pure transition logic lives in [`backoff`] and [`state`]; all socket
//! I/O is confined to [`connection`].

pub mod backoff;
pub mod connection;
pub mod state;

pub use backoff::ReconnectSchedule;
pub use connection::{HubLink, LinkConfig};
pub use state::LinkState;
