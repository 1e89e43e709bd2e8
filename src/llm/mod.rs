//! LLM 层：协作方抽象与实现（OpenAI 兼容 / Mock）、prompt 构造、提取解析

pub mod extraction;
pub mod mock;
pub mod openai;
pub mod prompt;
pub mod traits;

pub use extraction::{extraction_schema_json, parse_extraction};
pub use mock::{placeholder_asset_url, MockCollaborator, ScriptedTurn};
pub use openai::OpenAiCollaborator;
pub use prompt::{build_extraction_prompt, build_system_prompt, load_persona, DEFAULT_PERSONA};
pub use traits::{Collaborator, ExtractionRequest, FragmentStream, LlmError, TurnRequest};
