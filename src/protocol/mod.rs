pub mod frame;
pub mod message;
pub mod transfer;
pub mod wire;

pub use frame::{FrameCodec, FrameReader, FrameWriter, SEPARATOR, TERMINATOR};
pub use message::{
    IdentifyKind, ManagerKind, Message, MessageKind, NodeKind, SectionAssignment, SubmitKind,
};
pub use wire::{from_wire_json, to_wire_json};
