pub mod assemble;
pub mod buffer;
pub mod decode;
pub mod opcode;

pub use assemble::ActionWriter;
pub use buffer::ActionBuffer;
pub use decode::{decode, DecodeError, Decoded, FunctionArg, FunctionHeader, Instruction, PushItem};
pub use opcode::ActionCode;
