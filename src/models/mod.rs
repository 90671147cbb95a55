pub mod incident;
pub mod schedule;
pub mod settings;
pub mod user;

pub use incident::*;
pub use schedule::*;
pub use settings::*;
pub use user::*;
