//! Wire types for the Wardbell realtime transport.
//!
//! STOMP 1.2 framing, protocol constants, and the chat/call-bell message
//! shapes pushed by the backend broker.

pub mod constants;
pub mod envelope;
pub mod frame;
pub mod messages;

// Re-export primary types for convenience.
pub use constants::MessageKind;
pub use envelope::{InboundMessage, ParseFailure};
pub use frame::{
    Command, Frame, FrameError, HeartBeat, decode_frames, decode_frames_bytes,
    decode_frames_bytes_partial, decode_frames_partial, is_heartbeat,
};
pub use messages::{CallBellRequest, ChatMessage, OutgoingChatMessage, ReadReceiptNotification};
