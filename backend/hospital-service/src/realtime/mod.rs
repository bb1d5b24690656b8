//! Realtime gateway
//!
//! Architecture:
//! 1. ChannelHub: open connections and their user/role/department channels
//! 2. RealtimeSession: one actix actor per WebSocket, heartbeat and client messages
//! 3. Services publish queue, status and notification events through the hub

pub mod hub;
pub mod messages;
pub mod session;

pub use hub::{department_audience, Channel, ChannelHub, ConnectionId, EventSender};
pub use messages::{ClientMessage, QueueAction, RealtimeEvent};
pub use session::RealtimeSession;
