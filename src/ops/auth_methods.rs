//! Authentication-method inventory and removal.
//!
//! The password method is never listed and never removable here.

use tracing::info;

use super::batch::BatchReport;
use super::search::find_user;
use super::OpContext;
use crate::console::prompt::{parse_selection, print_numbered};
use crate::directory::{AuthMethod, DirectoryUser};
use crate::error::{ApiError, PromptError, ValidationError};

/// Removable methods of a user, in directory order.
pub async fn list(ctx: &mut OpContext<'_>, user_id: &str) -> Result<Vec<AuthMethod>, ApiError> {
    let methods = ctx.directory.list_auth_methods(ctx.session, user_id).await?;
    Ok(removable(methods))
}

fn removable(methods: Vec<AuthMethod>) -> Vec<AuthMethod> {
    methods
        .into_iter()
        .filter(|m| !m.kind.is_password())
        .collect()
}

/// Delete one method. Failures are reported; returns whether the call succeeded.
pub async fn remove_one(ctx: &mut OpContext<'_>, user: &DirectoryUser, method: &AuthMethod) -> bool {
    try_remove(ctx, user, method).await.is_ok()
}

async fn try_remove(
    ctx: &mut OpContext<'_>,
    user: &DirectoryUser,
    method: &AuthMethod,
) -> Result<(), ApiError> {
    match ctx
        .directory
        .delete_auth_method(ctx.session, &user.id, method)
        .await
    {
        Ok(()) => {
            info!(
                "Removed {} from {}",
                method.kind.label(),
                user.user_principal_name
            );
            ctx.say(&format!("Removed {}.", method.display_text()));
            Ok(())
        }
        Err(e) => {
            ctx.report_failure(
                &format!(
                    "Remove {} from {}",
                    method.display_text(),
                    user.user_principal_name
                ),
                &e,
            );
            Err(e)
        }
    }
}

/// Delete every method in `methods`, one call each, continuing past failures.
pub async fn remove_all(
    ctx: &mut OpContext<'_>,
    user: &DirectoryUser,
    methods: &[AuthMethod],
) -> BatchReport {
    let mut report = BatchReport::new(&format!(
        "Remove authentication methods of {}",
        user.user_principal_name
    ));
    for method in methods {
        match try_remove(ctx, user, method).await {
            Ok(()) => report.add_success(method.display_text()),
            Err(e) => report.add_failure(method.display_text(), e.to_string()),
        }
    }
    report
}

/// States of the MFA management workflow.
#[derive(Debug, Clone, PartialEq)]
enum MfaState {
    Listing,
    RemovingOne(AuthMethod),
    RemovingAll(Vec<AuthMethod>),
    Exit,
}

/// Pick a user, then list and remove methods until the operator exits.
///
/// The listing is fetched again after every removal before it is shown.
pub async fn manage(ctx: &mut OpContext<'_>) -> Result<(), PromptError> {
    let Some(user) = find_user(ctx).await? else {
        return Ok(());
    };

    let mut state = MfaState::Listing;
    loop {
        state = match state {
            MfaState::Listing => listing_step(ctx, &user).await?,
            MfaState::RemovingOne(method) => {
                remove_one(ctx, &user, &method).await;
                MfaState::Listing
            }
            MfaState::RemovingAll(methods) => {
                let prompt = format!(
                    "Remove all {} authentication method(s) of {}?",
                    methods.len(),
                    user.user_principal_name
                );
                if ctx.prompter.confirm(&prompt)? {
                    let report = remove_all(ctx, &user, &methods).await;
                    report.print(&mut *ctx.prompter);
                } else {
                    ctx.say("Nothing removed.");
                }
                MfaState::Listing
            }
            MfaState::Exit => return Ok(()),
        };
    }
}

async fn listing_step(
    ctx: &mut OpContext<'_>,
    user: &DirectoryUser,
) -> Result<MfaState, PromptError> {
    let mut methods = match list(ctx, &user.id).await {
        Ok(methods) => methods,
        Err(e) => {
            ctx.report_failure(
                &format!("List authentication methods of {}", user.user_principal_name),
                &e,
            );
            return Ok(MfaState::Exit);
        }
    };

    if methods.is_empty() {
        ctx.say(&format!(
            "{} has no removable authentication methods.",
            user.user_principal_name
        ));
        return Ok(MfaState::Exit);
    }

    ctx.say(&format!(
        "Authentication methods of {}:",
        user.user_principal_name
    ));
    print_numbered(&mut *ctx.prompter, &methods, AuthMethod::display_text);

    let input = ctx
        .prompter
        .read_line("Number to remove, A to remove all, blank to go back")?;
    if input.is_empty() || input == "0" {
        return Ok(MfaState::Exit);
    }
    if input.eq_ignore_ascii_case("a") {
        return Ok(MfaState::RemovingAll(methods));
    }
    match parse_selection(&input, methods.len()) {
        Some(index) => Ok(MfaState::RemovingOne(methods.swap_remove(index))),
        None => {
            ctx.say(&ValidationError::InvalidSelection(input).to_string());
            Ok(MfaState::Listing)
        }
    }
}
