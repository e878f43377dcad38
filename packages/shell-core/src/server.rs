//! Server record: a registered remote host jobs can target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::credential::Credential;

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Server {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub name: String,
    pub hostname: String,

    #[builder(default = 22)]
    pub port: i32,

    pub username: String,

    #[builder(default = true)]
    pub is_active: bool,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,

    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Server {
    pub fn new(name: impl Into<String>, hostname: impl Into<String>, username: impl Into<String>) -> Self {
        Self::builder()
            .name(name.into())
            .hostname(hostname.into())
            .username(username.into())
            .build()
    }

    /// A server can be targeted by a new job iff it is active; disabling it
    /// preserves job history without allowing new dispatch (§3).
    pub fn can_accept_new_jobs(&self) -> bool {
        self.is_active
    }
}

/// A server plus the credential used to authenticate against it.
///
/// The credential is deliberately not a field on [`Server`] itself: the
/// store persists it in a column the [`crate::job::Job`] path never touches,
/// keeping the hot job-dispatch read from ever pulling secret material it
/// doesn't need for servers it isn't connecting to right now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerWithCredential {
    pub server: Server,
    pub credential: Credential,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_server_defaults_to_port_22_and_active() {
        let server = Server::new("h", "h.example.com", "u");
        assert_eq!(server.port, 22);
        assert!(server.is_active);
        assert!(server.can_accept_new_jobs());
    }

    #[test]
    fn disabled_server_cannot_accept_new_jobs() {
        let mut server = Server::new("h", "h.example.com", "u");
        server.is_active = false;
        assert!(!server.can_accept_new_jobs());
    }
}
