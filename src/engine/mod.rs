pub mod context;
pub mod pipeline;
pub mod scheduler;

pub use context::PipelineOptions;
pub use pipeline::ChapterPipeline;
pub use scheduler::RetryPolicy;
