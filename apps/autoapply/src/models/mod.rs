pub mod application;
pub mod run;

pub use application::{
    ApplicationFilter, ApplicationPage, ApplicationRow, ApplicationStats, ApplicationStatus,
    NewApplication,
};
pub use run::{RunCounter, RunRow, RunStatus};
