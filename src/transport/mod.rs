//! Transport layer.
//!
//! - **Packet framing**: [`MessagePacket`], the 16-byte header every frame
//!   carries on the channel
//! - **Message codec**: [`Message`] and its [`MessageBlock`]s
//! - **Line protocol**: string-length-prefix wrapping in [`prefix`]
//! - **Round trips**: [`MessageTransport`] with its persisted
//!   [`MessageTransportState`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            CommandSession               │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   messages, blocks, counters, packets   │
//! ├─────────────────────────────────────────┤
//! │         MessageCipher                   │
//! ├─────────────────────────────────────────┤
//! │         PodChannel                      │
//! └─────────────────────────────────────────┘
//! ```

pub mod blocks;
mod error;
mod message;
mod message_transport;
mod packet;
pub mod prefix;

pub use blocks::{
    ErrorResponse, MessageBlock, MessageBlockType, PodInfoResponse, PodInfoType, ResponseBlock,
    StatusResponse, VersionResponse,
};
pub use error::*;
pub use message::Message;
pub use message_transport::{
    open_packet, seal_packet, MessageTransport, MessageTransportState,
};
pub use packet::{MessagePacket, PacketType};
