//! Wire framing and operator command handling

pub mod command;
pub mod frame;

pub use command::{
    apply_command, parse_operator_command, Action, Applied, CommandOutcome, CommandRequest,
    OperatorCommand, ParseError, Target,
};
pub use frame::{Frame, FrameReader};
