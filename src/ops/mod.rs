//! Console operations against the directory.
//!
//! Every operation runs inside an [`OpContext`]: the directory collaborator, the active
//! session, the operator prompter and the error log. Remote failures are reported through
//! [`OpContext::report_failure`] and never unwind past the operation that issued them.

pub mod auth_methods;
pub mod batch;
pub mod licenses;
pub mod search;
pub mod users;

use tracing::error;

use crate::auth::Session;
use crate::config::DirectoryConfig;
use crate::console::error_log::ErrorLog;
use crate::console::prompt::Prompter;
use crate::directory::Directory;
use crate::error::ApiError;

/// Everything an operation needs for one menu action.
pub struct OpContext<'a> {
    pub directory: &'a dyn Directory,
    pub session: &'a Session,
    pub prompter: &'a mut dyn Prompter,
    pub error_log: &'a ErrorLog,
    pub policy: &'a DirectoryConfig,
}

impl OpContext<'_> {
    pub fn say(&mut self, line: &str) {
        self.prompter.say(line);
    }

    /// Log a failed remote call, tell the operator and invalidate the session if the
    /// authorization has expired.
    pub fn report_failure(&mut self, operation: &str, err: &ApiError) {
        error!("{} failed: {}", operation, err);
        self.error_log.record(operation, &err.to_string());
        self.prompter
            .say(&format!("{} failed. {}", operation, err.user_message()));

        if err.requires_reconnect() {
            self.session.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ApiError;
    use crate::testing::Harness;

    #[test]
    fn test_report_failure_invalidates_on_expired_authorization() {
        let mut harness = Harness::new();

        harness
            .ctx()
            .report_failure("Add license", &ApiError::Forbidden);
        assert!(harness.session.is_valid());

        harness
            .ctx()
            .report_failure("Add license", &ApiError::Unauthorized);
        assert!(!harness.session.is_valid());

        let log = std::fs::read_to_string(harness.error_log.path()).unwrap();
        assert!(log.contains("ERROR: Add license\nDetails: Forbidden (403)"));
        assert!(harness.prompter.printed("Add license failed."));
    }
}
