//! Wire protocol primitives: frames, masking, handshake messages and URLs.
//!
//! Nothing in this module performs I/O.

pub mod fragmenter;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod url;

pub use fragmenter::{Fragment, Fragmenter};
pub use frame::{Frame, FrameHeader, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key};
pub use mask::{MaskGenerator, apply_mask, apply_mask_fast};
pub use opcode::OpCode;
pub use url::WsUrl;
