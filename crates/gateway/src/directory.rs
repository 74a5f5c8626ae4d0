//! Consumed external capabilities: identity validation and organization
//! membership listing.
//!
//! The gateway never stores identities or memberships; it asks the auth
//! and organization services over HTTP and treats the answers as
//! authoritative. The traits keep the handshake handler testable without
//! live services.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Errors from the external capability services.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The credential is missing, invalid, or expired.
    #[error("credential rejected")]
    Unauthenticated,

    /// The capability service could not be reached or answered badly.
    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for DirectoryError {
    fn from(e: reqwest::Error) -> Self {
        DirectoryError::Unavailable(e.to_string())
    }
}

/// Authenticated identity, as returned by the auth service.
#[derive(Debug, Clone, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub status: String,
    pub user_type: String,
}

/// One organization membership row.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Membership {
    pub organization_id: String,
    pub role: String,
}

/// Exchange an access token for an authenticated identity.
#[async_trait]
pub trait IdentityValidator: Send + Sync {
    async fn validate(&self, access_token: &str) -> Result<Identity, DirectoryError>;
}

/// List a user's current organization memberships.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    async fn list_memberships(&self, user_id: &str) -> Result<Vec<Membership>, DirectoryError>;

    /// Whether the user currently belongs to the organization. Used to
    /// re-validate client-asserted subscription targets; a client claim
    /// is never trusted without this check.
    async fn is_member(&self, user_id: &str, organization_id: &str) -> Result<bool, DirectoryError> {
        let memberships = self.list_memberships(user_id).await?;
        Ok(memberships
            .iter()
            .any(|m| m.organization_id == organization_id))
    }
}

/// HTTP client for the auth service's token validation endpoint.
pub struct AuthServiceClient {
    base_url: String,
    http: reqwest::Client,
}

impl AuthServiceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl IdentityValidator for AuthServiceClient {
    async fn validate(&self, access_token: &str) -> Result<Identity, DirectoryError> {
        let url = format!("{}/auth/validate", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(DirectoryError::Unauthenticated);
        }
        if !response.status().is_success() {
            return Err(DirectoryError::Unavailable(format!(
                "auth service returned {}",
                response.status()
            )));
        }

        let identity: Identity = response.json().await?;
        debug!(user_id = %identity.user_id, "Token validated");
        Ok(identity)
    }
}

/// HTTP client for the organization service's membership endpoint.
pub struct OrganizationServiceClient {
    base_url: String,
    http: reqwest::Client,
}

impl OrganizationServiceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MembershipDirectory for OrganizationServiceClient {
    async fn list_memberships(&self, user_id: &str) -> Result<Vec<Membership>, DirectoryError> {
        let url = format!("{}/users/{}/memberships", self.base_url, user_id);
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(DirectoryError::Unavailable(format!(
                "organization service returned {}",
                response.status()
            )));
        }

        let memberships: Vec<Membership> = response.json().await?;
        debug!(user_id = %user_id, count = memberships.len(), "Memberships fetched");
        Ok(memberships)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDirectory(Vec<Membership>);

    #[async_trait]
    impl MembershipDirectory for FixedDirectory {
        async fn list_memberships(&self, _user_id: &str) -> Result<Vec<Membership>, DirectoryError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn is_member_checks_the_listing() {
        let directory = FixedDirectory(vec![Membership {
            organization_id: "o1".to_string(),
            role: "member".to_string(),
        }]);

        assert!(directory.is_member("u1", "o1").await.unwrap());
        assert!(!directory.is_member("u1", "o2").await.unwrap());
    }
}
