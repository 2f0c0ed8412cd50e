// src/adapters/mod.rs — Production collaborators: LLM generator, subprocess
// executor and renderer, VLM evaluator

pub mod executor;
pub mod generator;
pub mod renderer;
pub mod vision;

pub use executor::ProcessExecutor;
pub use generator::LlmGenerator;
pub use renderer::ProcessRenderer;
pub use vision::VisionEvaluator;
