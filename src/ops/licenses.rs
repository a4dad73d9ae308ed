//! License catalog, seat checks and license assignment.
//!
//! The catalog and a user's current licenses are fetched again every time they are shown,
//! since seat counts and assignments change between menu renders. Add and remove are always
//! issued as separate calls.

use tracing::info;

use super::batch::BatchReport;
use super::search::find_user;
use super::OpContext;
use crate::console::prompt::{parse_selection, print_numbered};
use crate::directory::{DirectoryUser, LicenseDetail, LicenseSku};
use crate::error::{ApiError, PromptError, ValidationError};

/// License catalog with seat counts, in directory order.
pub async fn list_available(ctx: &mut OpContext<'_>) -> Result<Vec<LicenseSku>, ApiError> {
    ctx.directory.list_skus(ctx.session).await
}

/// Resolve a 1-indexed catalog selection.
///
/// Blank input cancels (`Ok(None)`). SKUs without available seats are rejected.
pub fn check_selection<'a>(
    skus: &'a [LicenseSku],
    input: &str,
) -> Result<Option<&'a LicenseSku>, ValidationError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }

    let index = parse_selection(input, skus.len())
        .ok_or_else(|| ValidationError::InvalidSelection(input.to_string()))?;
    let sku = &skus[index];
    if !sku.has_available_seats() {
        return Err(ValidationError::NoSeatsAvailable(sku.sku_part_number.clone()));
    }
    Ok(Some(sku))
}

/// Print the catalog and read a selection. Zero-seat picks are warned about and re-prompted.
pub async fn select_license(ctx: &mut OpContext<'_>) -> Result<Option<LicenseSku>, PromptError> {
    loop {
        let skus = match list_available(ctx).await {
            Ok(skus) => skus,
            Err(e) => {
                ctx.report_failure("Load license catalog", &e);
                return Ok(None);
            }
        };
        if skus.is_empty() {
            ctx.say("No licenses are available in this tenant.");
            return Ok(None);
        }

        ctx.say("Available licenses:");
        print_numbered(&mut *ctx.prompter, &skus, LicenseSku::display_text);
        let input = ctx.prompter.read_line("License number (blank to cancel)")?;

        match check_selection(&skus, &input) {
            Ok(choice) => return Ok(choice.cloned()),
            Err(e) => ctx.say(&format!("Warning: {}", e)),
        }
    }
}

/// Add one SKU to a user. Failures are reported; returns whether the call succeeded.
pub async fn assign(ctx: &mut OpContext<'_>, user: &DirectoryUser, sku: &LicenseSku) -> bool {
    match ctx
        .directory
        .add_license(ctx.session, &user.id, &sku.sku_id)
        .await
    {
        Ok(()) => {
            info!(
                "Assigned {} to {}",
                sku.sku_part_number, user.user_principal_name
            );
            ctx.say(&format!(
                "Assigned {} to {}.",
                sku.sku_part_number, user.user_principal_name
            ));
            true
        }
        Err(e) => {
            ctx.report_failure(
                &format!(
                    "Add license {} to {}",
                    sku.sku_part_number, user.user_principal_name
                ),
                &e,
            );
            false
        }
    }
}

/// Remove one SKU from a user. Failures are reported; returns whether the call succeeded.
pub async fn unassign(
    ctx: &mut OpContext<'_>,
    user: &DirectoryUser,
    license: &LicenseDetail,
) -> bool {
    match ctx
        .directory
        .remove_license(ctx.session, &user.id, &license.sku_id)
        .await
    {
        Ok(()) => {
            info!(
                "Removed {} from {}",
                license.sku_part_number, user.user_principal_name
            );
            ctx.say(&format!(
                "Removed {} from {}.",
                license.sku_part_number, user.user_principal_name
            ));
            true
        }
        Err(e) => {
            ctx.report_failure(
                &format!(
                    "Remove license {} from {}",
                    license.sku_part_number, user.user_principal_name
                ),
                &e,
            );
            false
        }
    }
}

/// A user's current licenses with their service plan states.
pub async fn current_licenses(
    ctx: &mut OpContext<'_>,
    user_id: &str,
) -> Result<Vec<LicenseDetail>, ApiError> {
    ctx.directory.list_license_details(ctx.session, user_id).await
}

/// Print a user's licenses with enabled and disabled service plans.
pub fn print_licenses(ctx: &mut OpContext<'_>, licenses: &[LicenseDetail]) {
    if licenses.is_empty() {
        ctx.say("  No licenses assigned.");
        return;
    }
    for (index, license) in licenses.iter().enumerate() {
        ctx.say(&format!("  {}. {}", index + 1, license.sku_part_number));
        let enabled = license.enabled_plans();
        if !enabled.is_empty() {
            ctx.say(&format!("       enabled: {}", enabled.join(", ")));
        }
        let disabled = license.disabled_plans();
        if !disabled.is_empty() {
            ctx.say(&format!("       disabled: {}", disabled.join(", ")));
        }
    }
}

/// Pick one of the user's currently assigned licenses, fetched fresh for every prompt.
pub async fn select_assigned_license(
    ctx: &mut OpContext<'_>,
    user: &DirectoryUser,
) -> Result<Option<LicenseDetail>, PromptError> {
    loop {
        let mut licenses = match current_licenses(ctx, &user.id).await {
            Ok(licenses) => licenses,
            Err(e) => {
                ctx.report_failure(
                    &format!("Load licenses of {}", user.user_principal_name),
                    &e,
                );
                return Ok(None);
            }
        };
        if licenses.is_empty() {
            ctx.say(&format!(
                "{} has no licenses assigned.",
                user.user_principal_name
            ));
            return Ok(None);
        }

        ctx.say(&format!("Licenses of {}:", user.user_principal_name));
        print_licenses(ctx, &licenses);
        let input = ctx.prompter.read_line("License number (blank to cancel)")?;
        if input.is_empty() {
            return Ok(None);
        }
        match parse_selection(&input, licenses.len()) {
            Some(index) => return Ok(Some(licenses.swap_remove(index))),
            None => ctx.say(&ValidationError::InvalidSelection(input).to_string()),
        }
    }
}

/// Add `sku` to every user in order, continuing past failures.
pub async fn bulk_assign(
    ctx: &mut OpContext<'_>,
    users: &[DirectoryUser],
    sku: &LicenseSku,
) -> BatchReport {
    let mut report = BatchReport::new(&format!("Add license {}", sku.sku_part_number));
    for user in users {
        match ctx
            .directory
            .add_license(ctx.session, &user.id, &sku.sku_id)
            .await
        {
            Ok(()) => {
                info!(
                    "Assigned {} to {}",
                    sku.sku_part_number, user.user_principal_name
                );
                report.add_success(&user.user_principal_name);
            }
            Err(e) => {
                ctx.report_failure(
                    &format!(
                        "Add license {} to {}",
                        sku.sku_part_number, user.user_principal_name
                    ),
                    &e,
                );
                report.add_failure(&user.user_principal_name, e.to_string());
            }
        }
    }
    report
}

/// One user and the licenses selected for removal from them.
#[derive(Debug, Clone)]
pub struct RemovalPlan {
    pub user: DirectoryUser,
    pub licenses: Vec<LicenseDetail>,
}

/// Apply every removal independently, in selection order.
pub async fn bulk_unassign(ctx: &mut OpContext<'_>, plans: &[RemovalPlan]) -> BatchReport {
    let mut report = BatchReport::new("Remove licenses");
    for plan in plans {
        for license in &plan.licenses {
            let name = format!(
                "{}: {}",
                plan.user.user_principal_name, license.sku_part_number
            );
            match ctx
                .directory
                .remove_license(ctx.session, &plan.user.id, &license.sku_id)
                .await
            {
                Ok(()) => {
                    info!("Removed {}", name);
                    report.add_success(name);
                }
                Err(e) => {
                    ctx.report_failure(&format!("Remove license {}", name), &e);
                    report.add_failure(name, e.to_string());
                }
            }
        }
    }
    report
}

/// Show the catalog with seat counts.
pub async fn show_catalog(ctx: &mut OpContext<'_>) {
    match list_available(ctx).await {
        Ok(skus) if skus.is_empty() => ctx.say("No licenses are available in this tenant."),
        Ok(skus) => {
            ctx.say("License catalog:");
            print_numbered(&mut *ctx.prompter, &skus, LicenseSku::display_text);
        }
        Err(e) => ctx.report_failure("Load license catalog", &e),
    }
}

/// Find a user, pick a license with free seats and assign it.
pub async fn assign_interactive(ctx: &mut OpContext<'_>) -> Result<(), PromptError> {
    let Some(user) = find_user(ctx).await? else {
        return Ok(());
    };
    if let Some(sku) = select_license(ctx).await? {
        assign(ctx, &user, &sku).await;
    }
    Ok(())
}

/// Find a user, pick one of their current licenses and remove it.
pub async fn unassign_interactive(ctx: &mut OpContext<'_>) -> Result<(), PromptError> {
    let Some(user) = find_user(ctx).await? else {
        return Ok(());
    };
    if let Some(license) = select_assigned_license(ctx, &user).await? {
        unassign(ctx, &user, &license).await;
    }
    Ok(())
}

/// Pick a license, then collect users until the operator stops, then assign to all.
pub async fn bulk_assign_interactive(ctx: &mut OpContext<'_>) -> Result<(), PromptError> {
    let Some(sku) = select_license(ctx).await? else {
        return Ok(());
    };

    let mut users: Vec<DirectoryUser> = Vec::new();
    loop {
        if let Some(user) = find_user(ctx).await? {
            if users.iter().any(|u| u.id == user.id) {
                ctx.say(&format!("{} is already selected.", user.user_principal_name));
            } else {
                ctx.say(&format!("Added {} to the batch.", user.user_principal_name));
                users.push(user);
            }
        }
        if !ctx.prompter.confirm("Select another user?")? {
            break;
        }
    }

    if users.is_empty() {
        ctx.say("No users selected.");
        return Ok(());
    }
    if !ctx.prompter.confirm(&format!(
        "Add {} to {} user(s)?",
        sku.sku_part_number,
        users.len()
    ))? {
        return Ok(());
    }

    let report = bulk_assign(ctx, &users, &sku).await;
    report.print(&mut *ctx.prompter);
    Ok(())
}

/// Collect (user, licenses) pairs until the operator stops, then remove them all.
pub async fn bulk_unassign_interactive(ctx: &mut OpContext<'_>) -> Result<(), PromptError> {
    let mut plans: Vec<RemovalPlan> = Vec::new();
    loop {
        if let Some(user) = find_user(ctx).await? {
            let mut licenses: Vec<LicenseDetail> = Vec::new();
            while let Some(license) = select_assigned_license(ctx, &user).await? {
                if !licenses.iter().any(|l| l.sku_id == license.sku_id) {
                    licenses.push(license);
                }
                if !ctx.prompter.confirm("Remove another license from this user?")? {
                    break;
                }
            }
            if !licenses.is_empty() {
                plans.push(RemovalPlan { user, licenses });
            }
        }
        if !ctx.prompter.confirm("Select another user?")? {
            break;
        }
    }

    let count: usize = plans.iter().map(|p| p.licenses.len()).sum();
    if count == 0 {
        ctx.say("Nothing selected.");
        return Ok(());
    }
    if !ctx
        .prompter
        .confirm(&format!("Remove {} license assignment(s)?", count))?
    {
        return Ok(());
    }

    let report = bulk_unassign(ctx, &plans).await;
    report.print(&mut *ctx.prompter);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::batch::ItemStatus;
    use crate::testing::{license_detail, sku, user, Call, FakeDirectory, Harness};

    fn catalog() -> FakeDirectory {
        FakeDirectory::new()
            .with_user(user("u1", "anna@contoso.com", "Anna"))
            .with_user(user("u2", "bob@contoso.com", "Bob"))
            .with_user(user("u3", "carl@contoso.com", "Carl"))
            .with_sku(sku("sku-e3", "ENTERPRISEPACK", 25, 22))
            .with_sku(sku("sku-full", "EMS", 10, 10))
            .with_sku(sku("sku-over", "POWER_BI_PRO", 5, 6))
    }

    #[test]
    fn test_check_selection() {
        let skus = vec![sku("a", "A", 2, 1), sku("b", "B", 1, 1)];

        assert_eq!(check_selection(&skus, "").unwrap(), None);
        assert_eq!(check_selection(&skus, "1").unwrap().map(|s| s.sku_id.as_str()), Some("a"));
        assert_eq!(
            check_selection(&skus, "2"),
            Err(ValidationError::NoSeatsAvailable("B".into()))
        );
        assert_eq!(
            check_selection(&skus, "3"),
            Err(ValidationError::InvalidSelection("3".into()))
        );
    }

    #[tokio::test]
    async fn test_zero_seat_sku_is_never_selected() {
        // pick the full SKU, then the over-consumed one, then cancel
        let mut harness = Harness::with(catalog(), ["2", "3", ""]);

        let selected = select_license(&mut harness.ctx()).await.unwrap();

        assert_eq!(selected, None);
        assert!(harness.prompter.printed("Warning: License EMS has no available seats"));
        assert!(harness
            .prompter
            .printed("Warning: License POWER_BI_PRO has no available seats"));
        assert!(harness.directory.mutations().is_empty());
        // catalog is fetched again for every prompt
        assert_eq!(
            harness.directory.calls(),
            vec![Call::ListSkus, Call::ListSkus, Call::ListSkus]
        );
    }

    #[tokio::test]
    async fn test_zero_seat_pick_in_assign_flow_makes_no_assignment() {
        // find Anna via listing, pick the full SKU, then cancel
        let mut harness = Harness::with(catalog(), ["2", "1", "2", ""]);

        assign_interactive(&mut harness.ctx()).await.unwrap();

        assert!(harness
            .directory
            .calls()
            .iter()
            .all(|c| !matches!(c, Call::AddLicense(..))));
    }

    #[tokio::test]
    async fn test_assign_interactive() {
        let mut harness = Harness::with(catalog(), ["2", "1", "1"]);

        assign_interactive(&mut harness.ctx()).await.unwrap();

        assert_eq!(
            harness.directory.mutations(),
            vec![Call::AddLicense("u1".into(), "sku-e3".into())]
        );
        assert!(harness.prompter.printed("Assigned ENTERPRISEPACK to anna@contoso.com."));
    }

    #[tokio::test]
    async fn test_catalog_display() {
        let mut harness = Harness::with(catalog(), Vec::<&str>::new());

        show_catalog(&mut harness.ctx()).await;

        assert!(harness.prompter.printed("1. ENTERPRISEPACK (3 of 25 available)"));
        assert!(harness.prompter.printed("2. EMS (0 of 10 available)"));
    }

    #[tokio::test]
    async fn test_removal_uses_current_license_detail() {
        // the catalog knows nothing about sku-legacy; only the user's detail list does
        let directory = catalog()
            .with_license("u1", license_detail("sku-legacy", "STANDARDPACK"))
            .with_license("u1", license_detail("sku-e3", "ENTERPRISEPACK"));
        let mut harness = Harness::with(directory, ["2", "1", "1"]);

        unassign_interactive(&mut harness.ctx()).await.unwrap();

        let calls = harness.directory.calls();
        assert_eq!(
            harness.directory.mutations(),
            vec![Call::RemoveLicense("u1".into(), "sku-legacy".into())]
        );
        let detail_fetch = calls
            .iter()
            .position(|c| *c == Call::ListLicenseDetails("u1".into()))
            .unwrap();
        let removal = calls
            .iter()
            .position(|c| matches!(c, Call::RemoveLicense(..)))
            .unwrap();
        assert!(detail_fetch < removal);
        assert!(!calls.contains(&Call::ListSkus));
    }

    #[tokio::test]
    async fn test_assigned_license_list_is_refetched_per_prompt() {
        let directory = catalog().with_license("u1", license_detail("sku-e3", "ENTERPRISEPACK"));
        let anna = directory.user("u1").unwrap();
        let mut harness = Harness::with(directory, ["5", "1"]);

        let selected = select_assigned_license(&mut harness.ctx(), &anna)
            .await
            .unwrap();

        assert_eq!(selected.map(|l| l.sku_id), Some("sku-e3".to_string()));
        assert_eq!(
            harness.directory.calls(),
            vec![
                Call::ListLicenseDetails("u1".into()),
                Call::ListLicenseDetails("u1".into())
            ]
        );
    }

    #[tokio::test]
    async fn test_bulk_assign_continues_past_failure() {
        let directory = catalog();
        directory.fail(
            Call::AddLicense("u2".into(), "sku-e3".into()),
            ApiError::BadRequest("Invalid usage location".into()),
        );
        let users: Vec<DirectoryUser> = ["u1", "u2", "u3"]
            .iter()
            .map(|id| directory.user(id).unwrap())
            .collect();
        let mut harness = Harness::with(directory, Vec::<&str>::new());

        let report = bulk_assign(&mut harness.ctx(), &users, &sku("sku-e3", "ENTERPRISEPACK", 25, 22)).await;

        assert_eq!(
            report.outcomes(),
            vec![ItemStatus::Success, ItemStatus::Failed, ItemStatus::Success]
        );
        assert_eq!(
            harness.directory.mutations(),
            vec![
                Call::AddLicense("u1".into(), "sku-e3".into()),
                Call::AddLicense("u2".into(), "sku-e3".into()),
                Call::AddLicense("u3".into(), "sku-e3".into()),
            ]
        );
        let log = std::fs::read_to_string(harness.error_log.path()).unwrap();
        assert!(log.contains("ERROR: Add license ENTERPRISEPACK to bob@contoso.com"));
    }

    #[tokio::test]
    async fn test_bulk_unassign_issues_separate_calls_in_order() {
        let directory = catalog();
        directory.fail(
            Call::RemoveLicense("u1".into(), "sku-a".into()),
            ApiError::Forbidden,
        );
        let plans = vec![
            RemovalPlan {
                user: directory.user("u1").unwrap(),
                licenses: vec![license_detail("sku-a", "A"), license_detail("sku-b", "B")],
            },
            RemovalPlan {
                user: directory.user("u2").unwrap(),
                licenses: vec![license_detail("sku-a", "A")],
            },
        ];
        let mut harness = Harness::with(directory, Vec::<&str>::new());

        let report = bulk_unassign(&mut harness.ctx(), &plans).await;

        assert_eq!(
            report.outcomes(),
            vec![ItemStatus::Failed, ItemStatus::Success, ItemStatus::Success]
        );
        assert_eq!(report.items[0].name, "anna@contoso.com: A");
        assert_eq!(harness.directory.mutations().len(), 3);
    }

    #[tokio::test]
    async fn test_bulk_assign_interactive() {
        // license 1, then Anna and Carl from the listing, then confirm
        let mut harness = Harness::with(
            catalog(),
            ["1", "2", "1", "y", "2", "3", "n", "y"],
        );

        bulk_assign_interactive(&mut harness.ctx()).await.unwrap();

        assert_eq!(
            harness.directory.mutations(),
            vec![
                Call::AddLicense("u1".into(), "sku-e3".into()),
                Call::AddLicense("u3".into(), "sku-e3".into()),
            ]
        );
        assert!(harness.prompter.printed("2 succeeded, 0 failed"));
    }
}
