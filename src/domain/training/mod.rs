pub mod events;
pub mod progress;
pub mod run;
pub mod types;
