mod cpu;
mod isa;

pub use cpu::{Core, CoreConfig, CoreError, Phase, Registers, Report, Status, TickOutcome};
pub use isa::{IllegalInstruction, Instruction, Opcode, Sel};

/// Low six bits of the status/aux bus carry the auxiliary payload.
pub const AUX_PAYLOAD_MASK: u8 = 0x3F;

/// Bit position of the 2-bit status code on the status/aux bus.
pub const STATUS_SHIFT: u8 = 6;

/// Aux payload reported when control flow continues sequentially.
///
/// Any payload below this value is a branch target index for the external
/// sequencer; the all-ones payload means "no branch".
pub const NO_BRANCH: u8 = 0x3F;
