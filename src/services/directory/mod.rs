// Directory Adapter (§4.C): resolves a user's uuid, email, roles, and
// project memberships from an external user directory, with an LDAP
// fallback. Grounded in `external_apis/core_api.py` (CoreApi) and
// `external_apis/ldap.py` (CmLdapMgr) of the original implementation.

pub mod ldap;
pub mod rest;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use once_cell::sync::Lazy;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("static uuid regex")
});

/// True when a role name is itself a uuid — these are filtered out of the
/// claim set at mint time (§3, §4.F.5).
pub fn looks_like_uuid(value: &str) -> bool {
    UUID_RE.is_match(value)
}

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("no cookie or bearer token supplied")]
    MissingCredential,
    #[error("user is not a member of project: {0}")]
    NotMember(String),
    #[error("project {0} is not active")]
    ProjectNotActive(String),
    #[error("project '{0}' not found")]
    ProjectNotFound(String),
    #[error("more than one project named '{0}'")]
    AmbiguousProjectName(String),
    #[error("directory http error: {0}")]
    Http(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMembership {
    pub is_member: bool,
    pub is_creator: bool,
    pub is_owner: bool,
    pub is_token_holder: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub uuid: String,
    pub name: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memberships: Option<ProjectMembership>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
}

/// A selector for `Projects`/`EnrichForProject` (§4.C).
pub enum ProjectSelector<'a> {
    Id(&'a str),
    Name(&'a str),
    All,
}

#[derive(Debug, Clone)]
pub struct Enrichment {
    pub uuid: Option<String>,
    pub email: String,
    pub roles: Vec<Role>,
    pub active_projects: Vec<ProjectInfo>,
    pub is_fleet_operator: bool,
}

/// Selected at startup by `enable-core-api`/`enable-project-registry` (§6),
/// letting the Lifecycle API and Mint Pipeline stay agnostic of which
/// concrete directory backend is active.
#[async_trait]
pub trait DirectoryAdapter: Send + Sync {
    async fn who_am_i(&self, cookie_or_token: &str) -> Result<(String, String), DirectoryError>;

    async fn enrich_for_project(
        &self,
        selector: ProjectSelector<'_>,
        cookie_or_token: &str,
    ) -> Result<Enrichment, DirectoryError>;
}
