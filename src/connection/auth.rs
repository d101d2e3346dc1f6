use std::fmt;

use serde::{Deserialize, Serialize};

/// Vendor/app pair that owns entities on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Tenant {
    pub vendor: String,
    pub app: String,
}

impl Tenant {
    pub fn new(vendor: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            app: app.into(),
        }
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.vendor, self.app)
    }
}

/// Credentials sent with every request.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Authorization {
    pub vendor: String,
    pub app: String,
    pub access_token: String,
}

impl Authorization {
    pub fn new(vendor: impl Into<String>, app: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            app: app.into(),
            access_token: access_token.into(),
        }
    }

    pub fn tenant(&self) -> Tenant {
        Tenant::new(self.vendor.clone(), self.app.clone())
    }

    pub fn is_complete(&self) -> bool {
        !self.vendor.is_empty() && !self.app.is_empty() && !self.access_token.is_empty()
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorization")
            .field("vendor", &self.vendor)
            .field("app", &self.app)
            .field("access_token", &"***")
            .finish()
    }
}

/// Identity of the caller on whose behalf an actor operates. Copied into
/// every mutation as the acting party.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CallerContext {
    pub method: String,
    pub ip: String,
    pub user_id: String,
    pub user_agent: String,
}

impl CallerContext {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Self::default()
        }
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
