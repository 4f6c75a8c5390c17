pub mod audit;
pub mod engine;
pub mod image;
pub mod injector;
pub mod supervisor;

pub use engine::{Executor, ResourceUsage, SnapshotSampler, StatsSampler};
pub use image::{image_tag, ImageBuilder};
pub use injector::CodeInjector;
pub use supervisor::ExecutionService;
