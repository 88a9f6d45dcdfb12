//! Wire protocol: event codes, envelope, typed events and the codec.

pub mod codec;
pub mod codes;
pub mod command;
pub mod envelope;
pub mod event;

pub use codec::{decode, decode_frame, CounterMode, Decoded, EventEncoder, SequenceCounter};
pub use codes::{ContentType, EventType, MessageStatus};
pub use command::ClientCommand;
pub use envelope::{BlockPayload, ContextInfo, EventData, WireEnvelope};
pub use event::{EventKind, StreamEvent, THINKING_DONE_TITLE, THINKING_START_TITLE};
