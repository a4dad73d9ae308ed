//! Directory object models for users, licenses, groups, roles and authentication methods.

use serde::{Deserialize, Serialize};

use crate::auth::SecureString;

/// A user object as returned by the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    /// Unique object identifier.
    pub id: String,

    /// User Principal Name (unique, email-like).
    #[serde(default)]
    pub user_principal_name: String,

    pub display_name: Option<String>,

    pub mail_nickname: Option<String>,

    pub job_title: Option<String>,

    pub department: Option<String>,

    pub account_enabled: Option<bool>,
}

impl DirectoryUser {
    /// Get the best available display name.
    pub fn display_name_or_upn(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.user_principal_name)
    }

    /// One-line summary for numbered listings: "Jane Doe <jane@contoso.com>".
    pub fn display_text(&self) -> String {
        format!(
            "{} <{}>",
            self.display_name_or_upn(),
            self.user_principal_name
        )
    }

    pub fn status_text(&self) -> &'static str {
        match self.account_enabled {
            Some(true) => "Enabled",
            Some(false) => "Disabled",
            None => "Unknown",
        }
    }
}

/// Request to create a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub display_name: String,
    pub user_principal_name: String,
    pub mail_nickname: String,
    pub password: SecureString,
    /// Require MFA registration together with the forced password change.
    pub force_mfa_registration: bool,
    pub usage_location: Option<String>,
}

/// Sparse update of user fields. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_enabled: Option<bool>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Names of the fields this patch changes, for logging.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.display_name.is_some() {
            fields.push("displayName");
        }
        if self.job_title.is_some() {
            fields.push("jobTitle");
        }
        if self.department.is_some() {
            fields.push("department");
        }
        if self.account_enabled.is_some() {
            fields.push("accountEnabled");
        }
        fields
    }
}

/// User lookup expressions understood by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserQuery {
    /// Display name or principal name starts with the fragment (case-insensitive).
    StartsWith(String),
    /// Display name or principal name ends with the fragment (case-insensitive).
    EndsWith(String),
    /// Exact principal name match.
    PrincipalName(String),
}

/// A purchasable license SKU with seat counts.
#[derive(Debug, Clone, PartialEq)]
pub struct LicenseSku {
    pub sku_id: String,
    pub sku_part_number: String,
    pub prepaid_seats: i64,
    pub consumed_seats: i64,
}

impl LicenseSku {
    pub fn available_seats(&self) -> i64 {
        self.prepaid_seats - self.consumed_seats
    }

    pub fn has_available_seats(&self) -> bool {
        self.available_seats() > 0
    }

    /// "ENTERPRISEPACK (3 of 25 available)".
    pub fn display_text(&self) -> String {
        format!(
            "{} ({} of {} available)",
            self.sku_part_number,
            self.available_seats(),
            self.prepaid_seats
        )
    }
}

/// A service plan inside a license assigned to a user.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePlan {
    #[serde(default)]
    pub service_plan_name: String,

    #[serde(default)]
    pub provisioning_status: String,
}

/// A license currently assigned to a user.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseDetail {
    pub sku_id: String,

    #[serde(default)]
    pub sku_part_number: String,

    #[serde(default)]
    pub service_plans: Vec<ServicePlan>,
}

impl LicenseDetail {
    pub fn enabled_plans(&self) -> Vec<&str> {
        self.plans_with_status("Success")
    }

    pub fn disabled_plans(&self) -> Vec<&str> {
        self.plans_with_status("Disabled")
    }

    fn plans_with_status(&self, status: &str) -> Vec<&str> {
        self.service_plans
            .iter()
            .filter(|p| p.provisioning_status.eq_ignore_ascii_case(status))
            .map(|p| p.service_plan_name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub display_name: Option<String>,
}

impl Group {
    pub fn name_or_id(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryRole {
    pub id: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
}

impl DirectoryRole {
    pub fn name_or_id(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// Discriminator prefix and suffix of Graph authentication method types.
const ODATA_PREFIX: &str = "#microsoft.graph.";
const ODATA_SUFFIX: &str = "AuthenticationMethod";

/// The kind of an authentication method, with its type-specific details.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthMethodKind {
    Authenticator {
        display_name: Option<String>,
        device_tag: Option<String>,
    },
    Phone {
        phone_number: Option<String>,
        phone_type: Option<String>,
    },
    Email {
        email_address: Option<String>,
    },
    Fido2 {
        model: Option<String>,
        display_name: Option<String>,
    },
    WindowsHello {
        display_name: Option<String>,
    },
    Password,
    TemporaryAccessPass {
        lifetime_minutes: Option<i64>,
    },
    /// A type this console does not know; the raw discriminator is kept.
    Other { odata_type: String },
}

impl AuthMethodKind {
    pub fn label(&self) -> &str {
        match self {
            Self::Authenticator { .. } => "Microsoft Authenticator",
            Self::Phone { .. } => "Phone",
            Self::Email { .. } => "Email",
            Self::Fido2 { .. } => "FIDO2 security key",
            Self::WindowsHello { .. } => "Windows Hello for Business",
            Self::Password => "Password",
            Self::TemporaryAccessPass { .. } => "Temporary Access Pass",
            Self::Other { odata_type } => odata_type
                .strip_prefix(ODATA_PREFIX)
                .unwrap_or(odata_type.as_str()),
        }
    }

    pub fn is_password(&self) -> bool {
        matches!(self, Self::Password)
    }
}

/// An authentication method registered by a user.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthMethod {
    pub id: String,
    pub odata_type: String,
    pub kind: AuthMethodKind,
}

impl AuthMethod {
    /// Graph collection segment used to delete this method, e.g. `phoneMethods`.
    pub fn collection_segment(&self) -> Option<String> {
        let name = self
            .odata_type
            .strip_prefix(ODATA_PREFIX)?
            .strip_suffix(ODATA_SUFFIX)?;
        if name.is_empty() {
            return None;
        }
        Some(format!("{}Methods", name))
    }

    /// Label plus the most useful detail: "Phone: +47 12345678 (mobile)".
    pub fn display_text(&self) -> String {
        let detail = match &self.kind {
            AuthMethodKind::Authenticator {
                display_name,
                device_tag,
            } => join_details(&[display_name.as_deref(), device_tag.as_deref()]),
            AuthMethodKind::Phone {
                phone_number,
                phone_type,
            } => match (phone_number, phone_type) {
                (Some(number), Some(kind)) => Some(format!("{} ({})", number, kind)),
                (Some(number), None) => Some(number.clone()),
                (None, kind) => kind.clone(),
            },
            AuthMethodKind::Email { email_address } => email_address.clone(),
            AuthMethodKind::Fido2 {
                model,
                display_name,
            } => join_details(&[display_name.as_deref(), model.as_deref()]),
            AuthMethodKind::WindowsHello { display_name } => display_name.clone(),
            AuthMethodKind::TemporaryAccessPass { lifetime_minutes } => {
                lifetime_minutes.map(|m| format!("valid {} min", m))
            }
            AuthMethodKind::Password | AuthMethodKind::Other { .. } => None,
        };

        match detail {
            Some(d) => format!("{}: {}", self.kind.label(), d),
            None => self.kind.label().to_string(),
        }
    }
}

fn join_details(parts: &[Option<&str>]) -> Option<String> {
    let parts: Vec<&str> = parts.iter().flatten().copied().filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" - "))
    }
}

/// Wire shape of `/users/{id}/authentication/methods` entries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAuthMethod {
    pub id: String,
    #[serde(rename = "@odata.type", default)]
    pub odata_type: String,
    pub display_name: Option<String>,
    pub device_tag: Option<String>,
    pub phone_number: Option<String>,
    pub phone_type: Option<String>,
    pub email_address: Option<String>,
    pub model: Option<String>,
    pub lifetime_in_minutes: Option<i64>,
}

impl From<RawAuthMethod> for AuthMethod {
    fn from(raw: RawAuthMethod) -> Self {
        let type_name = raw
            .odata_type
            .strip_prefix(ODATA_PREFIX)
            .unwrap_or(raw.odata_type.as_str());

        let kind = match type_name {
            "microsoftAuthenticatorAuthenticationMethod" => AuthMethodKind::Authenticator {
                display_name: raw.display_name,
                device_tag: raw.device_tag,
            },
            "phoneAuthenticationMethod" => AuthMethodKind::Phone {
                phone_number: raw.phone_number,
                phone_type: raw.phone_type,
            },
            "emailAuthenticationMethod" => AuthMethodKind::Email {
                email_address: raw.email_address,
            },
            "fido2AuthenticationMethod" => AuthMethodKind::Fido2 {
                model: raw.model,
                display_name: raw.display_name,
            },
            "windowsHelloForBusinessAuthenticationMethod" => AuthMethodKind::WindowsHello {
                display_name: raw.display_name,
            },
            "passwordAuthenticationMethod" => AuthMethodKind::Password,
            "temporaryAccessPassAuthenticationMethod" => AuthMethodKind::TemporaryAccessPass {
                lifetime_minutes: raw.lifetime_in_minutes,
            },
            _ => AuthMethodKind::Other {
                odata_type: raw.odata_type.clone(),
            },
        };

        AuthMethod {
            id: raw.id,
            odata_type: raw.odata_type,
            kind,
        }
    }
}
