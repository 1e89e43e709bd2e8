//! 规格追踪核心：字段注册表、类型化取值、会话状态、合并、进度评估与完成门控

pub mod gate;
pub mod merger;
pub mod progress;
pub mod registry;
pub mod state;
pub mod value;

pub use gate::{Brief, CompletionGate, ValidationError};
pub use merger::{ExtractionDelta, MergeOutcome, SpecMerger, DEFAULT_CONFIDENCE};
pub use progress::{satisfied, MissingField, ProgressEvaluator, ProgressSnapshot};
pub use registry::{BriefSlot, FieldRegistry, RegistryError, SpecField, Stage};
pub use state::SessionState;
pub use value::{FieldEntry, FieldKind, FieldValue};
