//! Execution inputs handed to stage work.

mod inputs;

pub use inputs::StageInputs;
