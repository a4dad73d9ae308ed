//! Resolve an operator's search text to exactly one directory user.

use tracing::{info, warn};

use super::OpContext;
use crate::console::prompt::{parse_selection, print_numbered};
use crate::directory::{DirectoryUser, UserQuery};
use crate::error::{PromptError, ValidationError};

/// Maximum results of a prefix or suffix query.
pub const SEARCH_RESULT_CAP: usize = 10;
/// Maximum users of the flat listing.
pub const LISTING_CAP: usize = 20;

/// Result of the two-pass search.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// Prefix or suffix matches, in directory order.
    Matches(Vec<DirectoryUser>),
    /// Neither pass matched.
    NoMatches,
    /// A query failed; this is the capped listing instead.
    Fallback(Vec<DirectoryUser>),
}

/// Trimmed, non-empty search fragment.
pub fn validate_fragment(fragment: &str) -> Result<&str, ValidationError> {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return Err(ValidationError::EmptySearch);
    }
    Ok(fragment)
}

/// Prefix query, then suffix query. Query failures degrade to the capped listing.
pub async fn search_candidates(
    ctx: &mut OpContext<'_>,
    fragment: &str,
) -> Result<SearchOutcome, ValidationError> {
    let fragment = validate_fragment(fragment)?;

    let passes = [
        UserQuery::StartsWith(fragment.to_string()),
        UserQuery::EndsWith(fragment.to_string()),
    ];
    for query in &passes {
        match ctx
            .directory
            .query_users(ctx.session, query, SEARCH_RESULT_CAP)
            .await
        {
            Ok(users) if !users.is_empty() => return Ok(SearchOutcome::Matches(users)),
            Ok(_) => {}
            Err(e) => {
                warn!("User query {:?} failed: {}, falling back to listing", query, e);
                if e.requires_reconnect() {
                    ctx.session.invalidate();
                }
                return Ok(SearchOutcome::Fallback(list_users(ctx).await));
            }
        }
    }

    Ok(SearchOutcome::NoMatches)
}

/// The capped flat listing. Failures are reported and yield an empty list.
pub async fn list_users(ctx: &mut OpContext<'_>) -> Vec<DirectoryUser> {
    match ctx.directory.list_users(ctx.session, LISTING_CAP).await {
        Ok(users) => users,
        Err(e) => {
            ctx.report_failure("List users", &e);
            Vec::new()
        }
    }
}

/// Interactive user picker.
///
/// Offers free-text search or the flat listing. Invalid or blank input restarts the loop;
/// `Ok(None)` means the operator cancelled or declined the listing after an empty search.
pub async fn find_user(ctx: &mut OpContext<'_>) -> Result<Option<DirectoryUser>, PromptError> {
    loop {
        ctx.say("Find a user:");
        ctx.say("  1. Search by name");
        ctx.say(&format!("  2. List users (first {})", LISTING_CAP));
        ctx.say("  0. Cancel");

        let candidates = match ctx.prompter.read_line("Choice")?.as_str() {
            "0" => return Ok(None),
            "1" => {
                let fragment = ctx.prompter.read_line("Name or principal name starts/ends with")?;
                match search_candidates(ctx, &fragment).await {
                    Ok(SearchOutcome::Matches(users)) => users,
                    Ok(SearchOutcome::Fallback(users)) => {
                        ctx.say("Search is unavailable, showing the user listing instead.");
                        users
                    }
                    Ok(SearchOutcome::NoMatches) => {
                        ctx.say(&format!("No users match '{}'.", fragment.trim()));
                        if !ctx.prompter.confirm("List all users instead?")? {
                            return Ok(None);
                        }
                        list_users(ctx).await
                    }
                    Err(e) => {
                        ctx.say(&e.to_string());
                        continue;
                    }
                }
            }
            "2" => list_users(ctx).await,
            other => {
                ctx.say(&ValidationError::InvalidSelection(other.to_string()).to_string());
                continue;
            }
        };

        if let Some(user) = pick_user(ctx, candidates)? {
            info!("Selected user {}", user.user_principal_name);
            return Ok(Some(user));
        }
    }
}

fn pick_user(
    ctx: &mut OpContext<'_>,
    mut users: Vec<DirectoryUser>,
) -> Result<Option<DirectoryUser>, PromptError> {
    if users.is_empty() {
        ctx.say("No users found.");
        return Ok(None);
    }

    print_numbered(&mut *ctx.prompter, &users, DirectoryUser::display_text);
    let input = ctx.prompter.read_line("User number")?;
    match parse_selection(&input, users.len()) {
        Some(index) => Ok(Some(users.swap_remove(index))),
        None => {
            ctx.say(&ValidationError::InvalidSelection(input).to_string());
            Ok(None)
        }
    }
}
