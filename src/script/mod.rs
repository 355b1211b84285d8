//! Script module - opcode constants, the script byte string, standard shapes, input verification

mod opcodes;
#[allow(clippy::module_inception)]
mod script;
mod standard;
mod verify;

pub use opcodes::*;
pub use script::*;
pub use standard::*;
pub use verify::*;
