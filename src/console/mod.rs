//! Operator-facing console: prompting, the error log file and the menu loop.

pub mod error_log;
pub mod menu;
pub mod prompt;

pub use error_log::ErrorLog;
pub use menu::run;
pub use prompt::TerminalPrompter;
