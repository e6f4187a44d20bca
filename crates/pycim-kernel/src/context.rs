//! Operation context, provider identity metadata and the environment binding
//! handed to providers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identity of the provider module registration targeted by a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdContainer {
    /// `Name` property of the provider module instance
    pub module_name: String,
    /// `Name` property of the provider instance
    pub provider_name: String,
    /// `Location` property of the provider module instance
    pub location: String,
    /// Whether the request targets a remote namespace
    #[serde(default)]
    pub remote_namespace: bool,
}

impl ProviderIdContainer {
    pub fn new(
        module_name: impl Into<String>,
        provider_name: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            provider_name: provider_name.into(),
            location: location.into(),
            remote_namespace: false,
        }
    }

    pub fn with_remote_namespace(mut self, remote: bool) -> Self {
        self.remote_namespace = remote;
        self
    }
}

/// Identity of an indication subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionId {
    pub namespace: String,
    pub filter_name: String,
    pub handler_name: String,
}

/// Per-request context supplied by the server core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    pub provider_id: ProviderIdContainer,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub content_language: Option<String>,
    /// Present on subscription requests
    #[serde(default)]
    pub subscription: Option<SubscriptionId>,
}

impl OperationContext {
    pub fn new(provider_id: ProviderIdContainer) -> Self {
        Self {
            provider_id,
            user_name: None,
            content_language: None,
            subscription: None,
        }
    }

    pub fn with_user(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    pub fn with_content_language(mut self, language: impl Into<String>) -> Self {
        self.content_language = Some(language.into());
        self
    }

    pub fn with_subscription(mut self, subscription: SubscriptionId) -> Self {
        self.subscription = Some(subscription);
        self
    }
}

/// Resolved identity of a provider; recomputed for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    pub module_name: String,
    pub provider_name: String,
    pub load_path: PathBuf,
    pub remote_namespace: bool,
}

/// Environment binding passed to a provider on every call into the runtime.
///
/// A fresh binding is built from the operation context for each call; it is
/// never shared between requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEnvironment {
    pub module_name: String,
    pub provider_name: String,
    pub user_name: Option<String>,
    pub content_language: Option<String>,
    pub subscription: Option<SubscriptionId>,
}

impl ProviderEnvironment {
    pub fn from_context(ctx: &OperationContext) -> Self {
        Self {
            module_name: ctx.provider_id.module_name.clone(),
            provider_name: ctx.provider_id.provider_name.clone(),
            user_name: ctx.user_name.clone(),
            content_language: ctx.content_language.clone(),
            subscription: ctx.subscription.clone(),
        }
    }
}
