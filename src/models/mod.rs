pub mod job;
pub mod package;
pub mod schedule;
pub mod settings;
pub mod update;
pub mod usage;

pub use job::*;
pub use package::*;
pub use schedule::*;
pub use settings::*;
pub use update::*;
pub use usage::*;
