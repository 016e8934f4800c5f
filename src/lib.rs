pub mod config;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod process;
pub mod store;
pub mod warehouse;

pub use config::Config;
pub use event::{PipelineResponse, StorageEvent};
pub use pipeline::Pipeline;
