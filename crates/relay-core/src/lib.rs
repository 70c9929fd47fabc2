//! # relay-core
//!
//! Connection tracking and channel fan-out for the relay.
//!
//! - **Registry** - Live connections, their liveness flag and current channel
//! - **Directory** - Channel name to member set, with echo-free broadcast
//! - **Liveness** - Timer-driven ping sweep that evicts silent peers
//! - **Relay** - Request dispatch: subscribe, persist-then-broadcast publish
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │  Connection │────▶│    Relay    │────▶│ MessageStore │
//! └─────────────┘     └─────────────┘     └──────────────┘
//!        ▲                   │
//!        │                   ▼
//! ┌─────────────┐     ┌─────────────┐
//! │  Registry   │◀────│  Directory  │◀──── Liveness
//! └─────────────┘     └─────────────┘
//! ```

pub mod directory;
pub mod liveness;
pub mod registry;
pub mod relay;

pub use directory::{ChannelDirectory, DirectoryError, DirectoryStats};
pub use liveness::{LivenessMonitor, SweepReport, DEFAULT_PROBE_INTERVAL};
pub use registry::{ConnectionId, ConnectionRegistry, ConnectionSnapshot, Outbound, Outbox};
pub use relay::{Handled, Relay, RelayError};
