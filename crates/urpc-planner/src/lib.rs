//! # URPC Planner
//!
//! Everything between the model and the repository that is pure text work:
//! rendering the system instruction, pulling a plan out of model output,
//! resolving id placeholders and decoding pseudo-code calls.

pub mod decoder;
pub mod instruction;
pub mod literal;
pub mod parser;
pub mod placeholder;

pub use decoder::{CallHeader, DecodedCall, OptionsMode, PseudoCodeDecoder, FALLBACK_SOURCE};
pub use instruction::InstructionBuilder;
pub use parser::{PlanParser, NO_PLAN_MESSAGE};
pub use placeholder::{IdGenerator, PlaceholderResolver, TimestampIdGenerator, GENERATED_ID, USER_ID};
