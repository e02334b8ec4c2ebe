pub mod alert;
pub mod pipeline;
pub mod runner;
pub mod settings;

pub use alert::LogAlertSink;
pub use pipeline::{Evaluation, ExitReport, Pipeline};
pub use runner::{Engine, EngineCommand, EngineHandle, EngineState};
pub use settings::Settings;
