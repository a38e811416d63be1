// LDAP fallback directory path, grounded in `external_apis/ldap.py`'s
// `CmLdapMgr`: a single mutex-guarded connection, `isMemberOf` attribute
// search, `CO:COU:(.+?):members:active` group-DN parsing, ignore-list and
// role-list filtering. Returns `(roles, tags)` only — no uuid, matching the
// original's LDAP path.

use async_trait::async_trait;
use ldap3::{LdapConnAsync, Scope, SearchEntry};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Mutex;

use super::{DirectoryAdapter, DirectoryError, Enrichment, ProjectInfo, ProjectSelector, Role};

static GROUP_DN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"CO:COU:(.+?):members:active").expect("static ldap group regex")
});

pub struct LdapDirectoryClient {
    host: String,
    bind_user: String,
    bind_password: String,
    search_base: String,
    ignore_list: Vec<String>,
    role_list: Vec<String>,
    // The underlying ldap3 connection is not safe to share across
    // concurrent binds/searches; §5 requires a process-wide mutex across
    // the whole bind/search/unbind sequence.
    conn_guard: Mutex<()>,
}

impl LdapDirectoryClient {
    pub fn new(
        host: String,
        bind_user: String,
        bind_password: String,
        search_base: String,
        ignore_list: Vec<String>,
        role_list: Vec<String>,
    ) -> Self {
        Self {
            host,
            bind_user,
            bind_password,
            search_base,
            ignore_list,
            role_list,
            conn_guard: Mutex::new(()),
        }
    }

    /// `get_project_and_roles` of `ldap.py`: binds, searches `isMemberOf`
    /// for the user, extracts project names via the group-DN regex, and
    /// returns the filtered role/tag lists plus whether `project_id` was
    /// among the resolved active groups.
    async fn resolve_memberships(
        &self,
        eppn: &str,
    ) -> Result<(Vec<String>, bool, Vec<String>), DirectoryError> {
        let _permit = self.conn_guard.lock().await;

        let (conn, mut ldap) = LdapConnAsync::new(&self.host)
            .await
            .map_err(|e| DirectoryError::Http(format!("ldap connect failed: {e}")))?;
        ldap3::drive!(conn);

        ldap.simple_bind(&self.bind_user, &self.bind_password)
            .await
            .map_err(|e| DirectoryError::Http(format!("ldap bind failed: {e}")))?
            .success()
            .map_err(|e| DirectoryError::Http(format!("ldap bind rejected: {e}")))?;

        let filter = format!("(eduPersonPrincipalName={eppn})");
        let (results, _res) = ldap
            .search(&self.search_base, Scope::Subtree, &filter, vec!["isMemberOf"])
            .await
            .map_err(|e| DirectoryError::Http(format!("ldap search failed: {e}")))?
            .success()
            .map_err(|e| DirectoryError::Http(format!("ldap search rejected: {e}")))?;

        let mut groups = Vec::new();
        for entry in results {
            let entry = SearchEntry::construct(entry);
            if let Some(values) = entry.attrs.get("isMemberOf") {
                groups.extend(values.iter().cloned());
            }
        }

        let _ = ldap.unbind().await;

        let mut project_names = Vec::new();
        for group_dn in &groups {
            if let Some(captures) = GROUP_DN_RE.captures(group_dn) {
                let project_name = captures[1].to_string();
                if !self.ignore_list.contains(&project_name) {
                    project_names.push(project_name);
                }
            }
        }

        let roles: Vec<String> = groups
            .iter()
            .filter(|dn| self.role_list.iter().any(|r| dn.contains(r.as_str())))
            .cloned()
            .collect();

        Ok((project_names, false, roles))
    }
}

#[async_trait]
impl DirectoryAdapter for LdapDirectoryClient {
    async fn who_am_i(&self, _cookie_or_token: &str) -> Result<(String, String), DirectoryError> {
        // The LDAP path never resolves a uuid (§4.C): callers needing an
        // identity string must rely on the upstream token's own claims.
        Err(DirectoryError::Http(
            "who_am_i is not supported by the LDAP directory path".to_string(),
        ))
    }

    async fn enrich_for_project(
        &self,
        selector: ProjectSelector<'_>,
        eppn: &str,
    ) -> Result<Enrichment, DirectoryError> {
        let (project_names, _has_uuid, role_dns) = self.resolve_memberships(eppn).await?;

        let requested_name = match selector {
            ProjectSelector::Id(id) => id,
            ProjectSelector::Name(name) => name,
            ProjectSelector::All => {
                let active_projects = project_names
                    .iter()
                    .map(|name| ProjectInfo {
                        uuid: name.clone(),
                        name: name.clone(),
                        active: true,
                        tags: None,
                        memberships: None,
                    })
                    .collect();
                return Ok(Enrichment {
                    uuid: None,
                    email: eppn.to_string(),
                    roles: role_dns.into_iter().map(|name| Role { name }).collect(),
                    active_projects,
                    is_fleet_operator: false,
                });
            }
        };

        // Resolved per spec's Open Question (§9): the LDAP path raises
        // rather than silently filtering, matching ldap.py's own explicit
        // `raise Exception(...)` for non-membership.
        if !project_names.iter().any(|name| name == requested_name) {
            return Err(DirectoryError::NotMember(requested_name.to_string()));
        }

        Ok(Enrichment {
            uuid: None,
            email: eppn.to_string(),
            roles: role_dns.into_iter().map(|name| Role { name }).collect(),
            active_projects: vec![ProjectInfo {
                uuid: requested_name.to_string(),
                name: requested_name.to_string(),
                active: true,
                tags: Some(Vec::new()),
                memberships: None,
            }],
            is_fleet_operator: false,
        })
    }
}
