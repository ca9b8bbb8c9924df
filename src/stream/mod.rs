pub mod frame;
pub mod transport;

// Re-export the stream surface for convenient access (e.g. `use crate::stream::EventStream`).
pub use frame::{Frame, FrameParser, DEFAULT_EVENT};
pub use transport::{EventStream, StreamState};
