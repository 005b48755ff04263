pub mod config;
pub mod course;
pub mod error;
pub mod progress;
pub mod student;
pub mod tutor;
pub mod utils;

pub use config::TutorConfig;
pub use error::{Error, Result};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[cfg(test)]
pub(crate) mod test_support;
