//! 核心层：错误、回合阶段、会话监管、编排器构建

pub mod builder;
pub mod error;
pub mod session_supervisor;
pub mod state;

pub use builder::{create_collaborator_from_config, create_orchestrator, OrchestratorBuilder};
pub use error::IntakeError;
pub use session_supervisor::SessionSupervisor;
pub use state::TurnPhase;
