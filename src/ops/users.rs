//! User lifecycle: creation, partial updates, group membership and sign-in toggling.

use tracing::{info, warn};

use super::batch::BatchReport;
use super::licenses::{assign, current_licenses, print_licenses, select_license};
use super::search::find_user;
use super::OpContext;
use crate::auth::SecureString;
use crate::console::prompt::{parse_selection, print_numbered};
use crate::directory::{DirectoryRole, DirectoryUser, NewUser, UserPatch, UserQuery};
use crate::error::{ApiError, AppError, PromptError, ValidationError};

/// Minimum password length.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Operator input for a new user, before validation.
#[derive(Debug, Clone)]
pub struct UserDraft {
    pub display_name: String,
    pub user_principal_name: String,
    pub mail_nickname: String,
    pub password: SecureString,
}

/// Check the `local@domain.tld` shape of a principal name.
pub fn validate_principal_name(upn: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidPrincipalName(upn.to_string());

    if upn.is_empty() || upn.chars().any(char::is_whitespace) {
        return Err(invalid());
    }

    let mut parts = upn.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    if local.is_empty() || !domain.contains('.') || domain.split('.').any(str::is_empty) {
        return Err(invalid());
    }
    Ok(())
}

/// Length plus all four character classes.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::PasswordTooShort(MIN_PASSWORD_LENGTH));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err(ValidationError::PasswordMissingUppercase);
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return Err(ValidationError::PasswordMissingLowercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(ValidationError::PasswordMissingDigit);
    }
    if !password.chars().any(|c| !c.is_alphanumeric()) {
        return Err(ValidationError::PasswordMissingSymbol);
    }
    Ok(())
}

fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyDisplayName);
    }
    Ok(())
}

fn validate_mail_nickname(nickname: &str) -> Result<(), ValidationError> {
    if nickname.trim().is_empty() {
        return Err(ValidationError::EmptyMailNickname);
    }
    Ok(())
}

/// Every local precondition of user creation. Issues no remote calls.
pub fn validate_new_user(draft: &UserDraft) -> Result<(), ValidationError> {
    validate_display_name(&draft.display_name)?;
    validate_principal_name(&draft.user_principal_name)?;
    validate_mail_nickname(&draft.mail_nickname)?;
    validate_password(draft.password.as_str())
}

/// Whether a user with this principal name exists.
///
/// A failed lookup counts as "not found"; the create call is authoritative.
pub async fn principal_name_exists(ctx: &mut OpContext<'_>, upn: &str) -> bool {
    let query = UserQuery::PrincipalName(upn.to_string());
    match ctx.directory.query_users(ctx.session, &query, 1).await {
        Ok(users) => !users.is_empty(),
        Err(e) => {
            warn!("Existence check for {} failed: {}", upn, e);
            if e.requires_reconnect() {
                ctx.session.invalidate();
            }
            false
        }
    }
}

/// Validate, check the principal name is free, then create the user.
pub async fn create_user(
    ctx: &mut OpContext<'_>,
    draft: &UserDraft,
) -> Result<DirectoryUser, AppError> {
    validate_new_user(draft)?;
    if principal_name_exists(ctx, &draft.user_principal_name).await {
        return Err(ValidationError::PrincipalNameTaken(draft.user_principal_name.clone()).into());
    }
    Ok(submit(ctx, draft).await?)
}

async fn submit(ctx: &mut OpContext<'_>, draft: &UserDraft) -> Result<DirectoryUser, ApiError> {
    let new_user = NewUser {
        display_name: draft.display_name.trim().to_string(),
        user_principal_name: draft.user_principal_name.clone(),
        mail_nickname: draft.mail_nickname.trim().to_string(),
        password: draft.password.clone(),
        force_mfa_registration: ctx.policy.force_mfa_registration,
        usage_location: ctx.policy.usage_location(),
    };

    let created = ctx.directory.create_user(ctx.session, &new_user).await?;
    info!(
        "Created user {} (MFA registration forced: {})",
        created.user_principal_name, new_user.force_mfa_registration
    );
    Ok(created)
}

/// Prompt until `validate` accepts the input.
fn prompt_valid<F>(ctx: &mut OpContext<'_>, prompt: &str, validate: F) -> Result<String, PromptError>
where
    F: Fn(&str) -> Result<(), ValidationError>,
{
    loop {
        let input = ctx.prompter.read_line(prompt)?;
        match validate(&input) {
            Ok(()) => return Ok(input),
            Err(e) => ctx.say(&e.to_string()),
        }
    }
}

/// Collect and validate every field, create the user, then offer a license and a role.
///
/// Each field is checked as it is entered. The final submission goes through
/// [`create_user`]; a taken principal name asks for a new one and tries again.
pub async fn create_user_interactive(ctx: &mut OpContext<'_>) -> Result<(), PromptError> {
    let display_name = prompt_valid(ctx, "Display name", validate_display_name)?;
    let user_principal_name = prompt_valid(ctx, "User principal name", validate_principal_name)?;
    let mail_nickname = prompt_valid(ctx, "Mail nickname", validate_mail_nickname)?;

    let password = loop {
        let password = SecureString::new(ctx.prompter.read_secret("Initial password")?);
        match validate_password(password.as_str()) {
            Ok(()) => break password,
            Err(e) => ctx.say(&e.to_string()),
        }
    };

    let mut draft = UserDraft {
        display_name,
        user_principal_name,
        mail_nickname,
        password,
    };
    let created = loop {
        match create_user(ctx, &draft).await {
            Ok(user) => break user,
            Err(AppError::Validation(e @ ValidationError::PrincipalNameTaken(_))) => {
                ctx.say(&e.to_string());
                draft.user_principal_name =
                    prompt_valid(ctx, "User principal name", validate_principal_name)?;
            }
            Err(AppError::Api(e)) => {
                ctx.report_failure(&format!("Create user {}", draft.user_principal_name), &e);
                return Ok(());
            }
            Err(e) => {
                ctx.say(&e.user_message());
                return Ok(());
            }
        }
    };
    ctx.say(&format!(
        "Created {}. The password must be changed at next sign-in.",
        created.display_text()
    ));

    if ctx.prompter.confirm("Assign a license to the new user?")? {
        if let Some(sku) = select_license(ctx).await? {
            assign(ctx, &created, &sku).await;
        }
    }
    if ctx.prompter.confirm("Assign a directory role to the new user?")? {
        assign_role_interactive(ctx, &created).await?;
    }
    Ok(())
}

/// Show the role catalog and add the user to the chosen role.
pub async fn assign_role_interactive(
    ctx: &mut OpContext<'_>,
    user: &DirectoryUser,
) -> Result<(), PromptError> {
    let roles = match ctx.directory.list_directory_roles(ctx.session).await {
        Ok(roles) => roles,
        Err(e) => {
            ctx.report_failure("Load directory roles", &e);
            return Ok(());
        }
    };
    if roles.is_empty() {
        ctx.say("No directory roles are activated in this tenant.");
        return Ok(());
    }

    ctx.say("Directory roles:");
    print_numbered(&mut *ctx.prompter, &roles, |r: &DirectoryRole| {
        format!("{} ({})", r.name_or_id(), r.id)
    });

    let role = loop {
        let input = ctx.prompter.read_line("Role number or id (blank to skip)")?;
        if input.is_empty() {
            return Ok(());
        }
        let found = parse_selection(&input, roles.len())
            .map(|i| &roles[i])
            .or_else(|| roles.iter().find(|r| r.id == input));
        match found {
            Some(role) => break role,
            None => ctx.say(&ValidationError::InvalidSelection(input).to_string()),
        }
    };

    match ctx
        .directory
        .add_role_member(ctx.session, &role.id, &user.id)
        .await
    {
        Ok(()) => {
            info!(
                "Added {} to role {}",
                user.user_principal_name,
                role.name_or_id()
            );
            ctx.say(&format!(
                "Added {} to {}.",
                user.user_principal_name,
                role.name_or_id()
            ));
        }
        Err(e) => ctx.report_failure(
            &format!(
                "Add {} to role {}",
                user.user_principal_name,
                role.name_or_id()
            ),
            &e,
        ),
    }
    Ok(())
}

/// Build a sparse update. Blank input leaves the field unchanged.
pub fn patch_from_inputs(display_name: &str, job_title: &str, department: &str) -> UserPatch {
    let changed = |value: &str| {
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    };
    UserPatch {
        display_name: changed(display_name),
        job_title: changed(job_title),
        department: changed(department),
        account_enabled: None,
    }
}

/// Apply a sparse update. An empty patch issues no call.
pub async fn update_user(ctx: &mut OpContext<'_>, user: &DirectoryUser, patch: &UserPatch) -> bool {
    if patch.is_empty() {
        ctx.say("No changes.");
        return false;
    }

    match ctx
        .directory
        .update_user(ctx.session, &user.id, patch)
        .await
    {
        Ok(()) => {
            info!(
                "Updated {} of {}",
                patch.changed_fields().join(", "),
                user.user_principal_name
            );
            ctx.say(&format!("Updated {}.", user.user_principal_name));
            true
        }
        Err(e) => {
            ctx.report_failure(&format!("Update user {}", user.user_principal_name), &e);
            false
        }
    }
}

fn print_user(ctx: &mut OpContext<'_>, user: &DirectoryUser) {
    let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    ctx.say(&format!("  Display name:   {}", field(&user.display_name)));
    ctx.say(&format!("  Principal name: {}", user.user_principal_name));
    ctx.say(&format!("  Mail nickname:  {}", field(&user.mail_nickname)));
    ctx.say(&format!("  Job title:      {}", field(&user.job_title)));
    ctx.say(&format!("  Department:     {}", field(&user.department)));
    ctx.say(&format!("  Sign-in:        {}", user.status_text()));
    ctx.say(&format!("  Object id:      {}", user.id));
}

/// Pick a user and change display name, job title or department.
pub async fn update_user_interactive(ctx: &mut OpContext<'_>) -> Result<(), PromptError> {
    let Some(user) = find_user(ctx).await? else {
        return Ok(());
    };
    print_user(ctx, &user);
    ctx.say("Leave a field blank to keep its current value.");

    let display_name = ctx.prompter.read_line("New display name")?;
    let job_title = ctx.prompter.read_line("New job title")?;
    let department = ctx.prompter.read_line("New department")?;

    let patch = patch_from_inputs(&display_name, &job_title, &department);
    update_user(ctx, &user, &patch).await;
    Ok(())
}

/// Direction of a group membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAction {
    Add,
    Remove,
}

/// Split comma or whitespace separated group ids, dropping duplicates.
pub fn parse_group_ids(input: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in input.split(|c: char| c == ',' || c.is_whitespace()) {
        if !id.is_empty() && !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// Resolve each group, then change the membership. Every id is processed independently.
pub async fn apply_group_changes(
    ctx: &mut OpContext<'_>,
    user: &DirectoryUser,
    action: GroupAction,
    group_ids: &[String],
) -> BatchReport {
    let operation = match action {
        GroupAction::Add => "Add to groups",
        GroupAction::Remove => "Remove from groups",
    };
    let mut report = BatchReport::new(operation);

    for group_id in group_ids {
        let group = match ctx.directory.get_group(ctx.session, group_id).await {
            Ok(group) => group,
            Err(e) => {
                ctx.report_failure(&format!("Resolve group {}", group_id), &e);
                let reason = match e {
                    ApiError::NotFound => "group not found".to_string(),
                    other => other.to_string(),
                };
                report.add_failure(group_id, reason);
                continue;
            }
        };

        let result = match action {
            GroupAction::Add => {
                ctx.directory
                    .add_group_member(ctx.session, &group.id, &user.id)
                    .await
            }
            GroupAction::Remove => {
                ctx.directory
                    .remove_group_member(ctx.session, &group.id, &user.id)
                    .await
            }
        };

        let name = format!("{} ({})", group.name_or_id(), group.id);
        match result {
            Ok(()) => {
                info!(
                    "{}: {} {}",
                    operation,
                    user.user_principal_name,
                    group.name_or_id()
                );
                report.add_success(name);
            }
            Err(e) => {
                ctx.report_failure(
                    &format!("{} {} for {}", operation, name, user.user_principal_name),
                    &e,
                );
                report.add_failure(name, e.to_string());
            }
        }
    }
    report
}

async fn print_groups(ctx: &mut OpContext<'_>, user: &DirectoryUser) {
    match ctx.directory.list_member_of(ctx.session, &user.id).await {
        Ok(groups) if groups.is_empty() => ctx.say("  No group memberships."),
        Ok(groups) => {
            for group in groups {
                ctx.say(&format!("  - {} ({})", group.name_or_id(), group.id));
            }
        }
        Err(e) => ctx.report_failure(
            &format!("Load groups of {}", user.user_principal_name),
            &e,
        ),
    }
}

/// Pick a user, show their groups and add or remove memberships by group id.
pub async fn manage_groups_interactive(ctx: &mut OpContext<'_>) -> Result<(), PromptError> {
    let Some(user) = find_user(ctx).await? else {
        return Ok(());
    };
    ctx.say(&format!("Groups of {}:", user.user_principal_name));
    print_groups(ctx, &user).await;

    ctx.say("  1. Add to groups");
    ctx.say("  2. Remove from groups");
    ctx.say("  0. Back");
    let action = loop {
        match ctx.prompter.read_line("Choice")?.as_str() {
            "1" => break GroupAction::Add,
            "2" => break GroupAction::Remove,
            "0" | "" => return Ok(()),
            other => ctx.say(&ValidationError::InvalidSelection(other.to_string()).to_string()),
        }
    };

    let ids = parse_group_ids(&ctx.prompter.read_line("Group ids (comma separated)")?);
    if ids.is_empty() {
        ctx.say("No group ids given.");
        return Ok(());
    }

    let report = apply_group_changes(ctx, &user, action, &ids).await;
    report.print(&mut *ctx.prompter);
    Ok(())
}

/// Flip the enabled flag, read fresh from the directory. Returns the new state.
pub async fn toggle_enabled(ctx: &mut OpContext<'_>, user_id: &str) -> Result<bool, ApiError> {
    let current = ctx.directory.get_user(ctx.session, user_id).await?;
    let enabled = current.account_enabled.ok_or_else(|| {
        ApiError::ParseFailed(format!(
            "accountEnabled missing for {}",
            current.user_principal_name
        ))
    })?;

    let patch = UserPatch {
        account_enabled: Some(!enabled),
        ..Default::default()
    };
    ctx.directory.update_user(ctx.session, user_id, &patch).await?;

    info!(
        "{} sign-in for {}",
        if enabled { "Disabled" } else { "Enabled" },
        current.user_principal_name
    );
    Ok(!enabled)
}

/// Pick a user and enable or disable sign-in.
pub async fn toggle_enabled_interactive(ctx: &mut OpContext<'_>) -> Result<(), PromptError> {
    let Some(user) = find_user(ctx).await? else {
        return Ok(());
    };
    if !ctx.prompter.confirm(&format!(
        "Toggle sign-in for {}?",
        user.user_principal_name
    ))? {
        return Ok(());
    }

    match toggle_enabled(ctx, &user.id).await {
        Ok(true) => ctx.say(&format!("{} is now enabled.", user.user_principal_name)),
        Ok(false) => ctx.say(&format!("{} is now disabled.", user.user_principal_name)),
        Err(e) => ctx.report_failure(
            &format!("Toggle sign-in for {}", user.user_principal_name),
            &e,
        ),
    }
    Ok(())
}

/// Pick a user and show fields, licenses and groups, all fetched fresh.
pub async fn show_details_interactive(ctx: &mut OpContext<'_>) -> Result<(), PromptError> {
    let Some(selected) = find_user(ctx).await? else {
        return Ok(());
    };
    let user = match ctx.directory.get_user(ctx.session, &selected.id).await {
        Ok(user) => user,
        Err(e) => {
            ctx.report_failure(&format!("Load user {}", selected.user_principal_name), &e);
            return Ok(());
        }
    };

    ctx.say(&format!("User {}:", user.display_text()));
    print_user(ctx, &user);

    ctx.say("Licenses:");
    match current_licenses(ctx, &user.id).await {
        Ok(licenses) => print_licenses(ctx, &licenses),
        Err(e) => ctx.report_failure(
            &format!("Load licenses of {}", user.user_principal_name),
            &e,
        ),
    }

    ctx.say("Groups:");
    print_groups(ctx, &user).await;
    Ok(())
}
