use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransportError;

/// Profile information from the identity provider
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Profile {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// An authenticated session. Lives until logout.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub access_token: String,
    pub profile: Profile,
}

impl Session {
    pub fn new(access_token: impl Into<String>, profile: Profile) -> Self {
        Self {
            id: Uuid::new_v4(),
            access_token: access_token.into(),
            profile,
        }
    }

    pub fn email(&self) -> &str {
        &self.profile.email
    }
}

/// Resolves an access token to the user's profile
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn fetch_profile(&self, access_token: &str) -> Result<Profile, TransportError>;
}

/// Google OAuth userinfo endpoint
#[derive(Debug, Clone)]
pub struct GoogleIdentity {
    http: reqwest::Client,
    userinfo_url: String,
}

impl GoogleIdentity {
    pub fn new(http: reqwest::Client, userinfo_url: impl Into<String>) -> Self {
        Self {
            http,
            userinfo_url: userinfo_url.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentity {
    async fn fetch_profile(&self, access_token: &str) -> Result<Profile, TransportError> {
        let response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::error!("profile request failed: {}", response.status());
            return Err(TransportError::Status {
                endpoint: self.userinfo_url.clone(),
                status: response.status().as_u16(),
            });
        }

        let profile: Profile = response.json().await?;
        if profile.email.is_empty() {
            return Err(TransportError::InvalidResponse(
                "profile has no email".to_string(),
            ));
        }
        Ok(profile)
    }
}
