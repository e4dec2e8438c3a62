pub mod clients;
pub mod config;
pub mod cosmic;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod http;
pub mod limits;
pub mod normalize;
pub mod pipeline;
pub mod prompts;
pub mod redact;
pub mod store;

pub use config::Config;
pub use error::{Result, SomaError};
pub use normalize::{Question, StructuredAnalysis, Urgency};
pub use pipeline::AnalysisPipeline;
