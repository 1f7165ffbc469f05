mod assets;
pub mod clock;
pub mod collections;
pub mod config;
pub mod error;
pub mod lang;
pub mod outcome;
pub mod result;
pub mod sandbox;
pub mod serdable;
pub mod style;
pub mod template;
pub mod testcase;
pub mod tester;
pub mod watchdog;

pub use crate::config::GradingConfig;
pub use crate::error::{GradeError, Result};
pub use crate::outcome::Outcome;
pub use crate::testcase::TestCase;
pub use crate::tester::{GradingSession, Submission, Tester};
