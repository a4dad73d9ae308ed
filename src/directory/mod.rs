//! Directory service access.
//!
//! [`Directory`] is the collaborator surface the console operations depend on.
//! [`GraphClient`] implements it over Microsoft Graph; tests use an in-memory fake.

pub mod graph;
pub mod models;

use async_trait::async_trait;

use crate::auth::Session;
use crate::error::ApiError;

pub use graph::GraphClient;
pub use models::{
    AuthMethod, DirectoryRole, DirectoryUser, Group, LicenseDetail, LicenseSku,
    NewUser, UserPatch, UserQuery,
};

/// Remote directory operations. Every call is independent and non-atomic.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Users matching `query`, at most `top` results.
    async fn query_users(
        &self,
        session: &Session,
        query: &UserQuery,
        top: usize,
    ) -> Result<Vec<DirectoryUser>, ApiError>;

    /// The first `top` users of the directory.
    async fn list_users(&self, session: &Session, top: usize)
        -> Result<Vec<DirectoryUser>, ApiError>;

    async fn get_user(&self, session: &Session, user_id: &str) -> Result<DirectoryUser, ApiError>;

    async fn create_user(&self, session: &Session, user: &NewUser)
        -> Result<DirectoryUser, ApiError>;

    async fn update_user(
        &self,
        session: &Session,
        user_id: &str,
        patch: &UserPatch,
    ) -> Result<(), ApiError>;

    /// License catalog of the tenant.
    async fn list_skus(&self, session: &Session) -> Result<Vec<LicenseSku>, ApiError>;

    /// Licenses currently assigned to a user.
    async fn list_license_details(
        &self,
        session: &Session,
        user_id: &str,
    ) -> Result<Vec<LicenseDetail>, ApiError>;

    /// Add one SKU with no disabled service plans.
    async fn add_license(&self, session: &Session, user_id: &str, sku_id: &str)
        -> Result<(), ApiError>;

    async fn remove_license(
        &self,
        session: &Session,
        user_id: &str,
        sku_id: &str,
    ) -> Result<(), ApiError>;

    async fn list_directory_roles(&self, session: &Session)
        -> Result<Vec<DirectoryRole>, ApiError>;

    async fn add_role_member(
        &self,
        session: &Session,
        role_id: &str,
        user_id: &str,
    ) -> Result<(), ApiError>;

    /// Resolve a group by id. Unknown ids yield [`ApiError::NotFound`].
    async fn get_group(&self, session: &Session, group_id: &str) -> Result<Group, ApiError>;

    /// Groups the user is a direct member of.
    async fn list_member_of(&self, session: &Session, user_id: &str)
        -> Result<Vec<Group>, ApiError>;

    async fn add_group_member(
        &self,
        session: &Session,
        group_id: &str,
        user_id: &str,
    ) -> Result<(), ApiError>;

    async fn remove_group_member(
        &self,
        session: &Session,
        group_id: &str,
        user_id: &str,
    ) -> Result<(), ApiError>;

    /// All authentication methods of a user, including the password method.
    async fn list_auth_methods(
        &self,
        session: &Session,
        user_id: &str,
    ) -> Result<Vec<AuthMethod>, ApiError>;

    async fn delete_auth_method(
        &self,
        session: &Session,
        user_id: &str,
        method: &AuthMethod,
    ) -> Result<(), ApiError>;
}
