pub mod job_marker;
pub mod orchestrator;
pub mod postgres_store;
pub mod state_machine;
pub mod store;

#[cfg(test)]
pub mod memory_store;
#[cfg(test)]
pub mod testing;

pub use job_marker::PgJobMarker;
pub use orchestrator::{OrchestrationError, Orchestrator, OrchestratorSettings};
pub use postgres_store::PgApplicationStore;
pub use store::{ApplicationStore, StoreError};
