//! tally-core: session core for the tally remote summing shell.
//!
//! Provides the line-summing session state machine, the channel trait it
//! writes through, inbound channel events, and the CBOR wire messages and
//! framing shared by the server and client.

pub mod channel;
pub mod codec;
pub mod error;
pub mod messages;
pub mod session;

// Re-export commonly used items at crate root.
pub use channel::{ChannelEvent, DataKind, SessionChannel};
pub use codec::{cbor_decode, frame_encode, FrameDecoder, MAX_FRAME_SIZE};
pub use error::{LineError, TallyError, TallyResult};
pub use messages::{DataStream, Envelope, MsgType, Payload, PROTOCOL_VERSION};
pub use session::{parse_line, LineSession, SessionLimits, SessionState, PROMPT};
