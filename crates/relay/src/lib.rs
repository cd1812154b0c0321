pub mod agent;
pub mod errors;
pub mod executor;
pub mod models;
pub mod orchestrator;
pub mod peer;
pub mod prompt_template;
pub mod protocol;
pub mod providers;
pub mod routing;
pub mod systems;
pub mod task;
