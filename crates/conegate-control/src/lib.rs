pub mod dispatch;
pub mod doctor;
pub mod driver;
pub mod gate;
pub mod pipeline;

pub use driver::{run, RunSummary};
pub use gate::{GateMode, TriggerGate, TriggerZone};
pub use pipeline::{Activation, Pipeline, SharedPipeline};
