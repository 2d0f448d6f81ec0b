pub mod code;
pub mod error;
pub mod patch;
pub mod session;
pub mod wire;

pub use code::{generate_code, is_valid_code, normalize_code, CODE_ALPHABET, CODE_LENGTH};
pub use error::GatewayError;
pub use patch::{PatchError, SessionPatch};
pub use session::{
    default_plan, now_millis, plan_for_total, Phase, Session, Step, DEFAULT_SESSION_SECONDS,
    MAX_SESSION_SECONDS, MAX_STEPS,
};
pub use wire::{ClientMessage, ServerMessage};
