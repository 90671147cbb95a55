pub mod engine;
pub mod hours;
pub mod rotation;
pub mod schedule;
pub mod settings;

pub use engine::EscalationEngine;
pub use rotation::RotationTracker;
pub use schedule::ScheduleResolver;
pub use settings::RuntimeSettings;
