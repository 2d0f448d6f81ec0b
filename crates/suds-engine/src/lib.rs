pub mod client;
pub mod controller;
pub mod engine;
pub mod subscription;

pub use client::{GatewayClient, SessionRef};
pub use controller::SessionController;
pub use engine::{Command, EngineError, EngineState, Role, SyncEngine, CHECKPOINT_SECONDS};
pub use subscription::Subscription;
