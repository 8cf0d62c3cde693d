//! Framed control protocol shared with the remote client.

pub mod codec;
pub mod message;

pub use codec::FrameBuffer;
pub use message::{
    encode_frame, Command, ControllerMessage, Frame, BUF_SIZE, CTRL_MSG_HDR_SZ, HDR_SZ,
    MSG_BUF_SIZE,
};
