//! # relay-protocol
//!
//! Wire protocol definitions for the channel relay.
//!
//! Every frame is a JSON text message carrying a `type` discriminator.
//!
//! ## Inbound
//!
//! - `subscribe` - Join a channel (replacing any previous membership)
//! - `message` - Persist a message and fan it out to the channel
//!
//! ## Outbound
//!
//! - `subscribed` - Subscription acknowledgment
//! - `message` - A stored message broadcast to channel members
//! - `error` - Validation, parse, or persistence failure notice
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, ClientFrame, ServerFrame};
//!
//! let frame = codec::decode(r#"{"type":"subscribe","channelName":"room1"}"#).unwrap();
//! let ClientFrame::Subscribe(subscribe) = frame else { panic!("expected subscribe") };
//! let channel = subscribe.channel_name().unwrap();
//!
//! let reply = codec::encode(&ServerFrame::subscribed(channel)).unwrap();
//! assert_eq!(reply, r#"{"type":"subscribed","channelName":"room1"}"#);
//! ```

pub mod codec;
pub mod frames;
pub mod record;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{ClientFrame, Publish, PublishFrame, ServerFrame, SubscribeFrame, ValidationError};
pub use record::{MessageRecord, Sender, SenderProfile};
