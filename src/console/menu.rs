//! Main menu and dispatch loop.

use tracing::{debug, error, info};

use super::error_log::ErrorLog;
use super::prompt::Prompter;
use crate::auth::{connect_with_retry, RetryPolicy, SessionManager, SessionProvider};
use crate::config::DirectoryConfig;
use crate::directory::Directory;
use crate::error::{AppError, AuthError, PromptError, ValidationError};
use crate::ops::{auth_methods, licenses, users, OpContext};

/// Actions that can be triggered from the main menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    ShowUser,
    CreateUser,
    UpdateUser,
    ToggleEnabled,
    ManageGroups,
    LicenseCatalog,
    AssignLicense,
    RemoveLicense,
    BulkAssignLicense,
    BulkRemoveLicenses,
    ManageMfa,
    Exit,
}

impl MenuAction {
    /// Menu order.
    pub const ALL: [MenuAction; 12] = [
        Self::ShowUser,
        Self::CreateUser,
        Self::UpdateUser,
        Self::ToggleEnabled,
        Self::ManageGroups,
        Self::LicenseCatalog,
        Self::AssignLicense,
        Self::RemoveLicense,
        Self::BulkAssignLicense,
        Self::BulkRemoveLicenses,
        Self::ManageMfa,
        Self::Exit,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::ShowUser => "1",
            Self::CreateUser => "2",
            Self::UpdateUser => "3",
            Self::ToggleEnabled => "4",
            Self::ManageGroups => "5",
            Self::LicenseCatalog => "6",
            Self::AssignLicense => "7",
            Self::RemoveLicense => "8",
            Self::BulkAssignLicense => "9",
            Self::BulkRemoveLicenses => "10",
            Self::ManageMfa => "11",
            Self::Exit => "0",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::ShowUser => "Show user details",
            Self::CreateUser => "Create user",
            Self::UpdateUser => "Update user",
            Self::ToggleEnabled => "Enable or disable sign-in",
            Self::ManageGroups => "Manage group membership",
            Self::LicenseCatalog => "Show license catalog",
            Self::AssignLicense => "Assign license",
            Self::RemoveLicense => "Remove license",
            Self::BulkAssignLicense => "Assign license to several users",
            Self::BulkRemoveLicenses => "Remove licenses from several users",
            Self::ManageMfa => "Manage MFA methods",
            Self::Exit => "Exit",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        Self::ALL.into_iter().find(|action| action.key() == input)
    }
}

/// Run one menu action.
pub async fn dispatch(ctx: &mut OpContext<'_>, action: MenuAction) -> Result<(), PromptError> {
    debug!("Dispatching {:?}", action);
    match action {
        MenuAction::ShowUser => users::show_details_interactive(ctx).await,
        MenuAction::CreateUser => users::create_user_interactive(ctx).await,
        MenuAction::UpdateUser => users::update_user_interactive(ctx).await,
        MenuAction::ToggleEnabled => users::toggle_enabled_interactive(ctx).await,
        MenuAction::ManageGroups => users::manage_groups_interactive(ctx).await,
        MenuAction::LicenseCatalog => {
            licenses::show_catalog(ctx).await;
            Ok(())
        }
        MenuAction::AssignLicense => licenses::assign_interactive(ctx).await,
        MenuAction::RemoveLicense => licenses::unassign_interactive(ctx).await,
        MenuAction::BulkAssignLicense => licenses::bulk_assign_interactive(ctx).await,
        MenuAction::BulkRemoveLicenses => licenses::bulk_unassign_interactive(ctx).await,
        MenuAction::ManageMfa => auth_methods::manage(ctx).await,
        MenuAction::Exit => Ok(()),
    }
}

fn print_menu(prompter: &mut dyn Prompter) {
    prompter.say("");
    prompter.say("Directory administration");
    for action in MenuAction::ALL {
        prompter.say(&format!("  {:>2}. {}", action.key(), action.label()));
    }
}

/// The console loop.
///
/// Every iteration first makes sure a session with the required scopes exists. Running out
/// of connection attempts ends the loop with [`AuthError::RetriesExhausted`]; closed input
/// or the exit action end it normally.
pub async fn run<P: SessionProvider>(
    manager: &mut SessionManager<P>,
    retry: &RetryPolicy,
    directory: &dyn Directory,
    prompter: &mut dyn Prompter,
    error_log: &ErrorLog,
    policy: &DirectoryConfig,
) -> Result<(), AppError> {
    loop {
        if let Err(e) = connect_with_retry(manager, retry, &mut *prompter).await {
            error!(
                "Giving up on the directory connection (required scopes: {}): {}",
                manager.required_scopes(),
                e
            );
            error_log.record("Connect to directory", &e.to_string());
            return Err(e.into());
        }
        let Some(session) = manager.session() else {
            return Err(AuthError::OAuthFailed("no session after connecting".into()).into());
        };

        print_menu(prompter);
        let input = match prompter.read_line("Select an option") {
            Ok(input) => input,
            Err(PromptError::Closed) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let action = match MenuAction::parse(&input) {
            Some(MenuAction::Exit) => {
                info!("Exit requested");
                return Ok(());
            }
            Some(action) => action,
            None => {
                prompter.say(&ValidationError::InvalidSelection(input).to_string());
                continue;
            }
        };

        let mut ctx = OpContext {
            directory,
            session,
            prompter: &mut *prompter,
            error_log,
            policy,
        };
        match dispatch(&mut ctx, action).await {
            Ok(()) => {}
            Err(PromptError::Closed) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ScopeSet;
    use crate::error::ApiError;
    use crate::testing::{sku, user, Call, FakeDirectory, FakeSignIn, Harness};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(MenuAction::parse("1"), Some(MenuAction::ShowUser));
        assert_eq!(MenuAction::parse(" 10 "), Some(MenuAction::BulkRemoveLicenses));
        assert_eq!(MenuAction::parse("0"), Some(MenuAction::Exit));
        assert_eq!(MenuAction::parse("12"), None);
        assert_eq!(MenuAction::parse(""), None);

        for action in MenuAction::ALL {
            assert_eq!(MenuAction::parse(action.key()), Some(action));
        }
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_fatal() {
        let mut manager = SessionManager::new(FakeSignIn::failing(), ScopeSet::new(["A"]));
        let mut harness = Harness::with(FakeDirectory::new(), ["6"]);

        let result = run(
            &mut manager,
            &retry(),
            &harness.directory,
            &mut harness.prompter,
            &harness.error_log,
            &harness.policy,
        )
        .await;

        assert!(matches!(
            result,
            Err(AppError::Auth(AuthError::RetriesExhausted { attempts: 3, .. }))
        ));
        assert_eq!(harness.prompter.remaining(), 1);
        let log = std::fs::read_to_string(harness.error_log.path()).unwrap();
        assert!(log.contains("ERROR: Connect to directory"));
    }

    #[tokio::test]
    async fn test_expired_authorization_forces_reconnect() {
        let directory = FakeDirectory::new().with_sku(sku("sku-1", "EMS", 5, 1));
        directory.fail(Call::ListSkus, ApiError::Unauthorized);
        let sign_in = FakeSignIn::default();
        let connects = sign_in.connects.clone();
        let mut manager = SessionManager::new(sign_in, ScopeSet::new(["A"]));
        let mut harness = Harness::with(directory, ["6", "0"]);

        run(
            &mut manager,
            &retry(),
            &harness.directory,
            &mut harness.prompter,
            &harness.error_log,
            &harness.policy,
        )
        .await
        .unwrap();

        // first connect, then a second one after the 401 invalidated the session
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert!(harness.prompter.printed("Session expired"));
        let notices = harness
            .prompter
            .output()
            .iter()
            .filter(|l| l.as_str() == "Signing in to the directory")
            .count();
        assert_eq!(notices, 2);
    }

    #[tokio::test]
    async fn test_invalid_choice_and_closed_input() {
        let directory = FakeDirectory::new().with_user(user("u1", "jane@contoso.com", "Jane"));
        let sign_in = FakeSignIn::default();
        let connects = sign_in.connects.clone();
        let mut manager = SessionManager::new(sign_in, ScopeSet::new(["A"]));
        let mut harness = Harness::with(directory, ["42"]);

        let result = run(
            &mut manager,
            &retry(),
            &harness.directory,
            &mut harness.prompter,
            &harness.error_log,
            &harness.policy,
        )
        .await;

        assert!(result.is_ok());
        assert!(harness.prompter.printed("'42' is not a valid selection"));
        assert!(harness.prompter.printed("11. Manage MFA methods"));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }
}
