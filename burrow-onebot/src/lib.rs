// ABOUTME: OneBot v11 wire types shared by the gateway, dispatcher and modules
// ABOUTME: Covers API calls, inbound frame classification, events and message segments

pub mod api;
pub mod cq;
pub mod crc64;
pub mod event;
pub mod frame;
pub mod message;

pub use api::{ApiRequest, ApiResponse};
pub use event::{Event, EventKind, Sender};
pub use frame::{Frame, FrameError, Handshake};
pub use message::{Message, Segment};
