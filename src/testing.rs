//! In-memory collaborators for exercising operations without a terminal or network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use crate::auth::{ScopeSet, SecureString, Session, SessionProvider};
use crate::config::DirectoryConfig;
use crate::console::error_log::ErrorLog;
use crate::console::prompt::Prompter;
use crate::directory::models::{RawAuthMethod, ServicePlan};
use crate::directory::{
    AuthMethod, Directory, DirectoryRole, DirectoryUser, Group, LicenseDetail, LicenseSku,
    NewUser, UserPatch, UserQuery,
};
use crate::error::{ApiError, AuthError, PromptError};
use crate::ops::OpContext;

/// A directory call as seen by [`FakeDirectory`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    QueryUsers(UserQuery),
    ListUsers,
    GetUser(String),
    CreateUser(String),
    UpdateUser(String, UserPatch),
    ListSkus,
    ListLicenseDetails(String),
    AddLicense(String, String),
    RemoveLicense(String, String),
    ListDirectoryRoles,
    AddRoleMember(String, String),
    GetGroup(String),
    ListMemberOf(String),
    AddGroupMember(String, String),
    RemoveGroupMember(String, String),
    ListAuthMethods(String),
    DeleteAuthMethod(String, String),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateUser(_)
                | Self::UpdateUser(..)
                | Self::AddLicense(..)
                | Self::RemoveLicense(..)
                | Self::AddRoleMember(..)
                | Self::AddGroupMember(..)
                | Self::RemoveGroupMember(..)
                | Self::DeleteAuthMethod(..)
        )
    }
}

#[derive(Default)]
struct State {
    users: Vec<DirectoryUser>,
    skus: Vec<LicenseSku>,
    licenses: HashMap<String, Vec<LicenseDetail>>,
    roles: Vec<DirectoryRole>,
    role_members: Vec<(String, String)>,
    groups: Vec<Group>,
    memberships: HashMap<String, Vec<String>>,
    auth_methods: HashMap<String, Vec<AuthMethod>>,
}

/// Directory state held in memory. Records every call and fails the ones registered
/// with [`FakeDirectory::fail`].
#[derive(Default)]
pub struct FakeDirectory {
    state: Mutex<State>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<Vec<(Call, ApiError)>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user: DirectoryUser) -> Self {
        self.state.lock().unwrap().users.push(user);
        self
    }

    pub fn with_sku(self, sku: LicenseSku) -> Self {
        self.state.lock().unwrap().skus.push(sku);
        self
    }

    pub fn with_license(self, user_id: &str, detail: LicenseDetail) -> Self {
        self.state
            .lock()
            .unwrap()
            .licenses
            .entry(user_id.to_string())
            .or_default()
            .push(detail);
        self
    }

    pub fn with_role(self, role: DirectoryRole) -> Self {
        self.state.lock().unwrap().roles.push(role);
        self
    }

    pub fn with_group(self, group: Group) -> Self {
        self.state.lock().unwrap().groups.push(group);
        self
    }

    pub fn with_auth_methods(self, user_id: &str, methods: Vec<AuthMethod>) -> Self {
        self.state
            .lock()
            .unwrap()
            .auth_methods
            .insert(user_id.to_string(), methods);
        self
    }

    /// Make `call` fail with `error` every time it is issued.
    pub fn fail(&self, call: Call, error: ApiError) {
        self.failures.lock().unwrap().push((call, error));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn user(&self, user_id: &str) -> Option<DirectoryUser> {
        self.state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
    }

    pub fn role_members(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().role_members.clone()
    }

    pub fn group_ids_of(&self, user_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .memberships
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, call: Call) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(call.clone());
        match self.failures.lock().unwrap().iter().find(|(c, _)| *c == call) {
            Some((_, error)) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn matches_query(user: &DirectoryUser, query: &UserQuery) -> bool {
    let name = user.display_name.as_deref().unwrap_or_default().to_lowercase();
    let upn = user.user_principal_name.to_lowercase();
    match query {
        UserQuery::StartsWith(f) => {
            let f = f.to_lowercase();
            name.starts_with(&f) || upn.starts_with(&f)
        }
        UserQuery::EndsWith(f) => {
            let f = f.to_lowercase();
            name.ends_with(&f) || upn.ends_with(&f)
        }
        UserQuery::PrincipalName(p) => upn == p.to_lowercase(),
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn query_users(
        &self,
        _session: &Session,
        query: &UserQuery,
        top: usize,
    ) -> Result<Vec<DirectoryUser>, ApiError> {
        self.record(Call::QueryUsers(query.clone()))?;
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .filter(|u| matches_query(u, query))
            .take(top)
            .cloned()
            .collect())
    }

    async fn list_users(
        &self,
        _session: &Session,
        top: usize,
    ) -> Result<Vec<DirectoryUser>, ApiError> {
        self.record(Call::ListUsers)?;
        Ok(self.state.lock().unwrap().users.iter().take(top).cloned().collect())
    }

    async fn get_user(&self, _session: &Session, user_id: &str) -> Result<DirectoryUser, ApiError> {
        self.record(Call::GetUser(user_id.to_string()))?;
        self.user(user_id).ok_or(ApiError::NotFound)
    }

    async fn create_user(
        &self,
        _session: &Session,
        user: &NewUser,
    ) -> Result<DirectoryUser, ApiError> {
        self.record(Call::CreateUser(user.user_principal_name.clone()))?;
        let mut state = self.state.lock().unwrap();
        let created = DirectoryUser {
            id: format!("new-{}", state.users.len() + 1),
            user_principal_name: user.user_principal_name.clone(),
            display_name: Some(user.display_name.clone()),
            mail_nickname: Some(user.mail_nickname.clone()),
            job_title: None,
            department: None,
            account_enabled: Some(true),
        };
        state.users.push(created.clone());
        Ok(created)
    }

    async fn update_user(
        &self,
        _session: &Session,
        user_id: &str,
        patch: &UserPatch,
    ) -> Result<(), ApiError> {
        self.record(Call::UpdateUser(user_id.to_string(), patch.clone()))?;
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(ApiError::NotFound)?;
        if let Some(v) = &patch.display_name {
            user.display_name = Some(v.clone());
        }
        if let Some(v) = &patch.job_title {
            user.job_title = Some(v.clone());
        }
        if let Some(v) = &patch.department {
            user.department = Some(v.clone());
        }
        if let Some(v) = patch.account_enabled {
            user.account_enabled = Some(v);
        }
        Ok(())
    }

    async fn list_skus(&self, _session: &Session) -> Result<Vec<LicenseSku>, ApiError> {
        self.record(Call::ListSkus)?;
        Ok(self.state.lock().unwrap().skus.clone())
    }

    async fn list_license_details(
        &self,
        _session: &Session,
        user_id: &str,
    ) -> Result<Vec<LicenseDetail>, ApiError> {
        self.record(Call::ListLicenseDetails(user_id.to_string()))?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .licenses
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_license(
        &self,
        _session: &Session,
        user_id: &str,
        sku_id: &str,
    ) -> Result<(), ApiError> {
        self.record(Call::AddLicense(user_id.to_string(), sku_id.to_string()))?;
        let mut state = self.state.lock().unwrap();
        let sku = state
            .skus
            .iter_mut()
            .find(|s| s.sku_id == sku_id)
            .ok_or(ApiError::NotFound)?;
        sku.consumed_seats += 1;
        let detail = license_detail(sku_id, &sku.sku_part_number.clone());
        state
            .licenses
            .entry(user_id.to_string())
            .or_default()
            .push(detail);
        Ok(())
    }

    async fn remove_license(
        &self,
        _session: &Session,
        user_id: &str,
        sku_id: &str,
    ) -> Result<(), ApiError> {
        self.record(Call::RemoveLicense(user_id.to_string(), sku_id.to_string()))?;
        let mut state = self.state.lock().unwrap();
        if let Some(details) = state.licenses.get_mut(user_id) {
            details.retain(|d| d.sku_id != sku_id);
        }
        if let Some(sku) = state.skus.iter_mut().find(|s| s.sku_id == sku_id) {
            sku.consumed_seats -= 1;
        }
        Ok(())
    }

    async fn list_directory_roles(
        &self,
        _session: &Session,
    ) -> Result<Vec<DirectoryRole>, ApiError> {
        self.record(Call::ListDirectoryRoles)?;
        Ok(self.state.lock().unwrap().roles.clone())
    }

    async fn add_role_member(
        &self,
        _session: &Session,
        role_id: &str,
        user_id: &str,
    ) -> Result<(), ApiError> {
        self.record(Call::AddRoleMember(role_id.to_string(), user_id.to_string()))?;
        self.state
            .lock()
            .unwrap()
            .role_members
            .push((role_id.to_string(), user_id.to_string()));
        Ok(())
    }

    async fn get_group(&self, _session: &Session, group_id: &str) -> Result<Group, ApiError> {
        self.record(Call::GetGroup(group_id.to_string()))?;
        self.state
            .lock()
            .unwrap()
            .groups
            .iter()
            .find(|g| g.id == group_id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn list_member_of(
        &self,
        _session: &Session,
        user_id: &str,
    ) -> Result<Vec<Group>, ApiError> {
        self.record(Call::ListMemberOf(user_id.to_string()))?;
        let state = self.state.lock().unwrap();
        let ids = state.memberships.get(user_id).cloned().unwrap_or_default();
        Ok(state
            .groups
            .iter()
            .filter(|g| ids.contains(&g.id))
            .cloned()
            .collect())
    }

    async fn add_group_member(
        &self,
        _session: &Session,
        group_id: &str,
        user_id: &str,
    ) -> Result<(), ApiError> {
        self.record(Call::AddGroupMember(group_id.to_string(), user_id.to_string()))?;
        self.state
            .lock()
            .unwrap()
            .memberships
            .entry(user_id.to_string())
            .or_default()
            .push(group_id.to_string());
        Ok(())
    }

    async fn remove_group_member(
        &self,
        _session: &Session,
        group_id: &str,
        user_id: &str,
    ) -> Result<(), ApiError> {
        self.record(Call::RemoveGroupMember(group_id.to_string(), user_id.to_string()))?;
        if let Some(ids) = self.state.lock().unwrap().memberships.get_mut(user_id) {
            ids.retain(|id| id != group_id);
        }
        Ok(())
    }

    async fn list_auth_methods(
        &self,
        _session: &Session,
        user_id: &str,
    ) -> Result<Vec<AuthMethod>, ApiError> {
        self.record(Call::ListAuthMethods(user_id.to_string()))?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .auth_methods
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_auth_method(
        &self,
        _session: &Session,
        user_id: &str,
        method: &AuthMethod,
    ) -> Result<(), ApiError> {
        self.record(Call::DeleteAuthMethod(user_id.to_string(), method.id.clone()))?;
        if let Some(methods) = self.state.lock().unwrap().auth_methods.get_mut(user_id) {
            methods.retain(|m| m.id != method.id);
        }
        Ok(())
    }
}

/// Session provider that grants whatever is requested, or always fails.
#[derive(Default)]
pub struct FakeSignIn {
    pub connects: Arc<AtomicUsize>,
    fail: bool,
}

impl FakeSignIn {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SessionProvider for FakeSignIn {
    async fn connect(
        &self,
        scopes: &ScopeSet,
        prompter: &mut dyn Prompter,
    ) -> Result<Session, AuthError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        prompter.say("Signing in to the directory");
        if self.fail {
            return Err(AuthError::UserCancelled);
        }
        Ok(Session::new(
            SecureString::from("token"),
            None,
            scopes.clone(),
            Utc::now() + chrono::Duration::hours(1),
        ))
    }

    async fn refresh(&self, _session: &Session) -> Result<Session, AuthError> {
        Err(AuthError::TokenRefreshFailed("no refresh token".into()))
    }

    async fn disconnect(&self, _session: Session) {}
}

/// Replays operator input line by line and captures everything said.
pub struct ScriptedPrompter {
    input: VecDeque<String>,
    output: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(input: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            input: input.into_iter().map(Into::into).collect(),
            output: Vec::new(),
        }
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// True if any output line contains `text`.
    pub fn printed(&self, text: &str) -> bool {
        self.output.iter().any(|line| line.contains(text))
    }

    /// Input lines not consumed yet.
    pub fn remaining(&self) -> usize {
        self.input.len()
    }

    fn next(&mut self) -> Result<String, PromptError> {
        self.input.pop_front().ok_or(PromptError::Closed)
    }
}

impl Prompter for ScriptedPrompter {
    fn read_line(&mut self, _prompt: &str) -> Result<String, PromptError> {
        Ok(self.next()?.trim().to_string())
    }

    fn read_secret(&mut self, _prompt: &str) -> Result<String, PromptError> {
        self.next()
    }

    fn confirm(&mut self, _prompt: &str) -> Result<bool, PromptError> {
        let answer = self.next()?.to_lowercase();
        Ok(answer == "y" || answer == "yes")
    }

    fn say(&mut self, line: &str) {
        self.output.push(line.to_string());
    }
}

/// Fake directory, scripted prompter, live session and a throwaway error log.
pub struct Harness {
    pub directory: FakeDirectory,
    pub session: Session,
    pub prompter: ScriptedPrompter,
    pub error_log: ErrorLog,
    pub policy: DirectoryConfig,
    _log_dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeDirectory::new(), Vec::<&str>::new())
    }

    pub fn with<I, S>(directory: FakeDirectory, input: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let log_dir = TempDir::new().unwrap();
        Self {
            directory,
            session: test_session(),
            prompter: ScriptedPrompter::new(input),
            error_log: ErrorLog::new(log_dir.path().join("errors.log")),
            policy: DirectoryConfig {
                force_mfa_registration: false,
                default_usage_location: "NO".into(),
            },
            _log_dir: log_dir,
        }
    }

    pub fn ctx(&mut self) -> OpContext<'_> {
        OpContext {
            directory: &self.directory,
            session: &self.session,
            prompter: &mut self.prompter,
            error_log: &self.error_log,
            policy: &self.policy,
        }
    }
}

pub fn test_session() -> Session {
    Session::new(
        SecureString::from("token"),
        None,
        ScopeSet::default(),
        Utc::now() + chrono::Duration::hours(1),
    )
}

pub fn user(id: &str, upn: &str, display_name: &str) -> DirectoryUser {
    DirectoryUser {
        id: id.into(),
        user_principal_name: upn.into(),
        display_name: Some(display_name.into()),
        mail_nickname: None,
        job_title: None,
        department: None,
        account_enabled: Some(true),
    }
}

pub fn sku(sku_id: &str, part_number: &str, prepaid: i64, consumed: i64) -> LicenseSku {
    LicenseSku {
        sku_id: sku_id.into(),
        sku_part_number: part_number.into(),
        prepaid_seats: prepaid,
        consumed_seats: consumed,
    }
}

pub fn license_detail(sku_id: &str, part_number: &str) -> LicenseDetail {
    LicenseDetail {
        sku_id: sku_id.into(),
        sku_part_number: part_number.into(),
        service_plans: vec![ServicePlan {
            service_plan_name: format!("{}_PLAN", part_number),
            provisioning_status: "Success".into(),
        }],
    }
}

pub fn group(id: &str, name: &str) -> Group {
    Group {
        id: id.into(),
        display_name: Some(name.into()),
    }
}

/// Authentication method from a short type name, e.g. `"phone"` or `"password"`.
pub fn auth_method(id: &str, type_name: &str) -> AuthMethod {
    AuthMethod::from(RawAuthMethod {
        id: id.into(),
        odata_type: format!("#microsoft.graph.{}AuthenticationMethod", type_name),
        ..Default::default()
    })
}
