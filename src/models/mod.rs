pub mod job;
pub mod loaders;

pub use job::Job;
pub use loaders::load_job;
