//! Real-time chat fan-out engine.
//!
//! Clients join chats over WebSocket; every inbound message is published to
//! a durable queue, consumed back at-least-once, and broadcast to all live
//! connections of the target chat by a fixed pool of workers.

pub mod common;
pub mod dispatch;
pub mod message;
pub mod queue;
pub mod registry;
pub mod server;
