//! Wire-level protocol: framing, fixed-layout structs and command assembly.

pub mod assemble;
pub mod frame;
pub mod request;

pub use assemble::{assemble_capture_request, capture_command_bytes};
pub use frame::{encode_frame, FrameDecoder, FramingError};
pub use request::{CaptureRequest, NetConfig};
