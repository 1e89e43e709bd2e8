//! 对话回合：客户端事件、带内标记过滤、流式编排器

pub mod events;
pub mod marker;
pub mod orchestrator;

pub use events::{ChunkEvent, EventMetadata, TurnEvent, TurnFailure, FALLBACK_MESSAGE};
pub use marker::{strip_markers, AssetRequest, Filtered, MarkerFilter};
pub use orchestrator::{Orchestrator, TurnHandle, TurnSettings};
