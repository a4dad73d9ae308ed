//! Microsoft Graph implementation of the [`Directory`] collaborator.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};
use url::Url;
use uuid::Uuid;

use super::models::{
    AuthMethod, DirectoryRole, DirectoryUser, Group, LicenseDetail, LicenseSku, NewUser,
    RawAuthMethod, UserPatch, UserQuery,
};
use super::Directory;
use crate::auth::Session;
use crate::error::ApiError;

/// Public Microsoft Graph v1.0 endpoint, used when no base URL is configured.
pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// User properties fetched for every user query.
const USER_SELECT: &str =
    "id,displayName,userPrincipalName,mailNickname,jobTitle,department,accountEnabled";

/// Microsoft Graph API client.
pub struct GraphClient {
    http_client: Client,
    base_url: String,
}

impl GraphClient {
    /// Create a new Graph client against `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let http_client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Request(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| ApiError::Request(format!("Invalid URL for {}: {}", path, e)))
    }

    /// Start a request carrying the bearer token and a fresh `client-request-id`.
    fn request(&self, session: &Session, method: Method, url: Url) -> (RequestBuilder, String) {
        let request_id = Uuid::new_v4().to_string();
        debug!("{} {} (request id {})", method, url, request_id);
        let builder = self
            .http_client
            .request(method, url)
            .bearer_auth(session.access_token())
            .header("client-request-id", &request_id);
        (builder, request_id)
    }

    async fn send(builder: RequestBuilder, request_id: &str) -> Result<Response, ApiError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;
        check_status(response, request_id).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        session: &Session,
        url: Url,
    ) -> Result<T, ApiError> {
        let (builder, request_id) = self.request(session, Method::GET, url);
        Self::send(builder, &request_id)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::ParseFailed(e.to_string()))
    }

    /// GET a collection, following `@odata.nextLink` pages.
    async fn get_collection<T: DeserializeOwned>(
        &self,
        session: &Session,
        url: Url,
    ) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let page: CollectionResponse<T> = self.get_json(session, url).await?;
            items.extend(page.value);
            if let Some(link) = page.next_link {
                next = Some(
                    Url::parse(&link).map_err(|e| ApiError::ParseFailed(e.to_string()))?,
                );
            }
        }
        Ok(items)
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        session: &Session,
        method: Method,
        url: Url,
        body: &B,
    ) -> Result<Response, ApiError> {
        let (builder, request_id) = self.request(session, method, url);
        Self::send(builder.json(body), &request_id).await
    }

    async fn assign_license(
        &self,
        session: &Session,
        user_id: &str,
        body: &AssignLicenseBody,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!("/users/{}/assignLicense", enc(user_id)))?;
        self.send_json(session, Method::POST, url, body).await?;
        Ok(())
    }
}

/// Percent-encode a path segment.
fn enc(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Quote a string literal for an OData filter.
fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// OData filter expression for a user query.
pub fn user_filter(query: &UserQuery) -> String {
    match query {
        UserQuery::StartsWith(fragment) => {
            let v = odata_literal(fragment);
            format!(
                "startswith(displayName,{v}) or startswith(userPrincipalName,{v})"
            )
        }
        UserQuery::EndsWith(fragment) => {
            let v = odata_literal(fragment);
            format!("endswith(displayName,{v}) or endswith(userPrincipalName,{v})")
        }
        UserQuery::PrincipalName(upn) => format!("userPrincipalName eq {}", odata_literal(upn)),
    }
}

/// Map a non-success Graph response to an [`ApiError`].
async fn check_status(response: Response, request_id: &str) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<GraphErrorResponse>(&body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));

    match status.as_u16() {
        400 => Err(ApiError::BadRequest(message)),
        401 => Err(ApiError::Unauthorized),
        403 => Err(ApiError::Forbidden),
        404 => Err(ApiError::NotFound),
        409 => Err(ApiError::Conflict(message)),
        429 => Err(ApiError::RateLimited),
        code => {
            error!("Graph request {} failed: HTTP {} - {}", request_id, code, body);
            Err(ApiError::Request(format!(
                "HTTP {} (request id {})",
                code, request_id
            )))
        }
    }
}

#[async_trait]
impl Directory for GraphClient {
    async fn query_users(
        &self,
        session: &Session,
        query: &UserQuery,
        top: usize,
    ) -> Result<Vec<DirectoryUser>, ApiError> {
        let mut url = self.url("/users")?;
        url.query_pairs_mut()
            .append_pair("$filter", &user_filter(query))
            .append_pair("$select", USER_SELECT)
            .append_pair("$top", &top.to_string());

        // endswith is only supported as an advanced query
        let advanced = matches!(query, UserQuery::EndsWith(_));
        if advanced {
            url.query_pairs_mut().append_pair("$count", "true");
        }

        let (mut builder, request_id) = self.request(session, Method::GET, url);
        if advanced {
            builder = builder.header("ConsistencyLevel", "eventual");
        }

        let page: CollectionResponse<DirectoryUser> = Self::send(builder, &request_id)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::ParseFailed(e.to_string()))?;
        Ok(page.value)
    }

    async fn list_users(
        &self,
        session: &Session,
        top: usize,
    ) -> Result<Vec<DirectoryUser>, ApiError> {
        let mut url = self.url("/users")?;
        url.query_pairs_mut()
            .append_pair("$select", USER_SELECT)
            .append_pair("$top", &top.to_string());

        let page: CollectionResponse<DirectoryUser> = self.get_json(session, url).await?;
        Ok(page.value)
    }

    async fn get_user(&self, session: &Session, user_id: &str) -> Result<DirectoryUser, ApiError> {
        let mut url = self.url(&format!("/users/{}", enc(user_id)))?;
        url.query_pairs_mut().append_pair("$select", USER_SELECT);
        self.get_json(session, url).await
    }

    async fn create_user(
        &self,
        session: &Session,
        user: &NewUser,
    ) -> Result<DirectoryUser, ApiError> {
        let body = CreateUserBody {
            account_enabled: true,
            display_name: &user.display_name,
            mail_nickname: &user.mail_nickname,
            user_principal_name: &user.user_principal_name,
            usage_location: user.usage_location.as_deref(),
            password_profile: PasswordProfile {
                force_change_password_next_sign_in: true,
                force_change_password_next_sign_in_with_mfa: user.force_mfa_registration,
                password: user.password.as_str(),
            },
        };

        let url = self.url("/users")?;
        let created: DirectoryUser = self
            .send_json(session, Method::POST, url, &body)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::ParseFailed(e.to_string()))?;

        info!("Created user {}", created.user_principal_name);
        Ok(created)
    }

    async fn update_user(
        &self,
        session: &Session,
        user_id: &str,
        patch: &UserPatch,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!("/users/{}", enc(user_id)))?;
        self.send_json(session, Method::PATCH, url, patch).await?;
        Ok(())
    }

    async fn list_skus(&self, session: &Session) -> Result<Vec<LicenseSku>, ApiError> {
        let url = self.url("/subscribedSkus")?;
        let items: Vec<SubscribedSkuItem> = self.get_collection(session, url).await?;

        Ok(items
            .into_iter()
            .map(|s| LicenseSku {
                sku_id: s.sku_id,
                sku_part_number: s.sku_part_number,
                prepaid_seats: s.prepaid_units.enabled,
                consumed_seats: s.consumed_units,
            })
            .collect())
    }

    async fn list_license_details(
        &self,
        session: &Session,
        user_id: &str,
    ) -> Result<Vec<LicenseDetail>, ApiError> {
        let url = self.url(&format!("/users/{}/licenseDetails", enc(user_id)))?;
        self.get_collection(session, url).await
    }

    async fn add_license(
        &self,
        session: &Session,
        user_id: &str,
        sku_id: &str,
    ) -> Result<(), ApiError> {
        let body = AssignLicenseBody {
            add_licenses: vec![AddLicense {
                sku_id: sku_id.to_string(),
                disabled_plans: vec![],
            }],
            remove_licenses: vec![],
        };
        self.assign_license(session, user_id, &body).await
    }

    async fn remove_license(
        &self,
        session: &Session,
        user_id: &str,
        sku_id: &str,
    ) -> Result<(), ApiError> {
        let body = AssignLicenseBody {
            add_licenses: vec![],
            remove_licenses: vec![sku_id.to_string()],
        };
        self.assign_license(session, user_id, &body).await
    }

    async fn list_directory_roles(
        &self,
        session: &Session,
    ) -> Result<Vec<DirectoryRole>, ApiError> {
        let url = self.url("/directoryRoles")?;
        self.get_collection(session, url).await
    }

    async fn add_role_member(
        &self,
        session: &Session,
        role_id: &str,
        user_id: &str,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!("/directoryRoles/{}/members/$ref", enc(role_id)))?;
        let body = json!({
            "@odata.id": format!("{}/directoryObjects/{}", self.base_url, user_id)
        });
        self.send_json(session, Method::POST, url, &body).await?;
        Ok(())
    }

    async fn get_group(&self, session: &Session, group_id: &str) -> Result<Group, ApiError> {
        let mut url = self.url(&format!("/groups/{}", enc(group_id)))?;
        url.query_pairs_mut().append_pair("$select", "id,displayName");
        self.get_json(session, url).await
    }

    async fn list_member_of(
        &self,
        session: &Session,
        user_id: &str,
    ) -> Result<Vec<Group>, ApiError> {
        let mut url = self.url(&format!(
            "/users/{}/memberOf/microsoft.graph.group",
            enc(user_id)
        ))?;
        url.query_pairs_mut().append_pair("$select", "id,displayName");
        self.get_collection(session, url).await
    }

    async fn add_group_member(
        &self,
        session: &Session,
        group_id: &str,
        user_id: &str,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!("/groups/{}/members/$ref", enc(group_id)))?;
        let body = json!({
            "@odata.id": format!("{}/directoryObjects/{}", self.base_url, user_id)
        });
        self.send_json(session, Method::POST, url, &body).await?;
        Ok(())
    }

    async fn remove_group_member(
        &self,
        session: &Session,
        group_id: &str,
        user_id: &str,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!(
            "/groups/{}/members/{}/$ref",
            enc(group_id),
            enc(user_id)
        ))?;
        let (builder, request_id) = self.request(session, Method::DELETE, url);
        Self::send(builder, &request_id).await?;
        Ok(())
    }

    async fn list_auth_methods(
        &self,
        session: &Session,
        user_id: &str,
    ) -> Result<Vec<AuthMethod>, ApiError> {
        let url = self.url(&format!("/users/{}/authentication/methods", enc(user_id)))?;
        let raw: Vec<RawAuthMethod> = self.get_collection(session, url).await?;
        Ok(raw.into_iter().map(AuthMethod::from).collect())
    }

    async fn delete_auth_method(
        &self,
        session: &Session,
        user_id: &str,
        method: &AuthMethod,
    ) -> Result<(), ApiError> {
        let segment = method.collection_segment().ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Unsupported authentication method type '{}'",
                method.odata_type
            ))
        })?;
        let url = self.url(&format!(
            "/users/{}/authentication/{}/{}",
            enc(user_id),
            segment,
            enc(&method.id)
        ))?;
        let (builder, request_id) = self.request(session, Method::DELETE, url);
        Self::send(builder, &request_id).await?;
        Ok(())
    }
}

// --- API Response Types ---

#[derive(Debug, Deserialize)]
struct CollectionResponse<T> {
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorResponse {
    error: GraphErrorBody,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribedSkuItem {
    sku_id: String,
    sku_part_number: String,
    consumed_units: i64,
    prepaid_units: PrepaidUnits,
}

#[derive(Debug, Deserialize)]
struct PrepaidUnits {
    enabled: i64,
}

// --- Request Body Types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssignLicenseBody {
    add_licenses: Vec<AddLicense>,
    remove_licenses: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddLicense {
    sku_id: String,
    disabled_plans: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserBody<'a> {
    account_enabled: bool,
    display_name: &'a str,
    mail_nickname: &'a str,
    user_principal_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage_location: Option<&'a str>,
    password_profile: PasswordProfile<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordProfile<'a> {
    force_change_password_next_sign_in: bool,
    force_change_password_next_sign_in_with_mfa: bool,
    password: &'a str,
}
