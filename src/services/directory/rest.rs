// REST directory path, grounded in `external_apis/core_api.py`'s `CoreApi`
// class: `/whoami`, `/people/{uuid}`, paginated `/projects`, with active +
// membership enforcement baked into every returned project.

use async_trait::async_trait;
use serde::Deserialize;

use super::{DirectoryAdapter, DirectoryError, Enrichment, ProjectInfo, ProjectMembership, ProjectSelector, Role};

const PROJECTS_PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
struct WhoAmIResponse {
    uuid: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct RolesResponse {
    roles: Vec<RemoteRole>,
}

#[derive(Debug, Deserialize)]
struct RemoteRole {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ProjectsResponse {
    results: Vec<RemoteProject>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct RemoteProject {
    uuid: String,
    name: String,
    active: bool,
    tags: Option<Vec<String>>,
    #[serde(rename = "is_member")]
    is_member: Option<bool>,
    #[serde(rename = "is_creator")]
    is_creator: Option<bool>,
    #[serde(rename = "is_owner")]
    is_owner: Option<bool>,
    #[serde(rename = "is_token_holder")]
    is_token_holder: Option<bool>,
}

pub struct CoreApiClient {
    base_url: String,
    http: reqwest::Client,
    fleet_operator_role: String,
}

impl CoreApiClient {
    pub fn new(base_url: String, fleet_operator_role: String) -> Self {
        Self {
            base_url,
            http: reqwest::Client::new(),
            fleet_operator_role,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        cookie_or_token: &str,
    ) -> Result<T, DirectoryError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {cookie_or_token}"))
            .send()
            .await
            .map_err(|e| DirectoryError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DirectoryError::Http(format!(
                "{} returned {}",
                path,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| DirectoryError::Http(e.to_string()))
    }

    /// `get_user_roles` of `core_api.py`, fetched via `/people/{uuid}`.
    async fn roles(&self, uuid: &str, cookie_or_token: &str) -> Result<Vec<Role>, DirectoryError> {
        let response: RolesResponse = self
            .get_json(&format!("/people/{uuid}?as_self=true"), cookie_or_token)
            .await?;
        Ok(response
            .roles
            .into_iter()
            .map(|r| Role { name: r.name })
            .collect())
    }

    /// Paginated `/projects`, mirroring `__get_user_projects`'s
    /// offset/limit-doubling loop until a page comes back short.
    async fn all_projects(&self, cookie_or_token: &str) -> Result<Vec<RemoteProject>, DirectoryError> {
        let mut offset = 0;
        let mut limit = PROJECTS_PAGE_SIZE;
        let mut collected = Vec::new();

        loop {
            let page: ProjectsResponse = self
                .get_json(
                    &format!("/projects?offset={offset}&limit={limit}"),
                    cookie_or_token,
                )
                .await?;

            let got = page.results.len();
            collected.extend(page.results);

            if collected.len() >= page.total || got == 0 {
                break;
            }
            offset += got;
            limit *= 2;
        }

        Ok(collected)
    }

    fn into_project_info(project: &RemoteProject, attach_detail: bool) -> ProjectInfo {
        ProjectInfo {
            uuid: project.uuid.clone(),
            name: project.name.clone(),
            active: project.active,
            tags: if attach_detail {
                project.tags.clone()
            } else {
                None
            },
            memberships: if attach_detail {
                Some(ProjectMembership {
                    is_member: project.is_member.unwrap_or(false),
                    is_creator: project.is_creator.unwrap_or(false),
                    is_owner: project.is_owner.unwrap_or(false),
                    is_token_holder: project.is_token_holder.unwrap_or(false),
                })
            } else {
                None
            },
        }
    }

    fn is_member_of(project: &RemoteProject) -> bool {
        project.is_member.unwrap_or(false)
            || project.is_creator.unwrap_or(false)
            || project.is_owner.unwrap_or(false)
    }
}

#[async_trait]
impl DirectoryAdapter for CoreApiClient {
    async fn who_am_i(&self, cookie_or_token: &str) -> Result<(String, String), DirectoryError> {
        if cookie_or_token.is_empty() {
            return Err(DirectoryError::MissingCredential);
        }
        let response: WhoAmIResponse = self.get_json("/whoami", cookie_or_token).await?;
        Ok((response.uuid, response.email))
    }

    async fn enrich_for_project(
        &self,
        selector: ProjectSelector<'_>,
        cookie_or_token: &str,
    ) -> Result<Enrichment, DirectoryError> {
        let (uuid, email) = self.who_am_i(cookie_or_token).await?;
        let roles = self.roles(&uuid, cookie_or_token).await?;
        let is_fleet_operator = roles
            .iter()
            .any(|r| r.name == self.fleet_operator_role);

        let projects = self.all_projects(cookie_or_token).await?;

        let active_projects = match selector {
            ProjectSelector::All => projects
                .iter()
                .filter(|p| p.active)
                .filter(|p| Self::is_member_of(p))
                .map(|p| Self::into_project_info(p, false))
                .collect::<Vec<_>>(),
            ProjectSelector::Id(id) => {
                let found = projects
                    .iter()
                    .find(|p| p.uuid == id)
                    .ok_or_else(|| DirectoryError::ProjectNotFound(id.to_string()))?;
                if !found.active {
                    return Err(DirectoryError::ProjectNotActive(found.name.clone()));
                }
                if !Self::is_member_of(found) {
                    return Err(DirectoryError::NotMember(found.name.clone()));
                }
                vec![Self::into_project_info(found, true)]
            }
            ProjectSelector::Name(name) => {
                let matches: Vec<&RemoteProject> =
                    projects.iter().filter(|p| p.name == name).collect();
                match matches.as_slice() {
                    [] => return Err(DirectoryError::ProjectNotFound(name.to_string())),
                    [single] => {
                        if !single.active {
                            return Err(DirectoryError::ProjectNotActive(single.name.clone()));
                        }
                        if !Self::is_member_of(single) {
                            return Err(DirectoryError::NotMember(single.name.clone()));
                        }
                        vec![Self::into_project_info(single, true)]
                    }
                    _ => return Err(DirectoryError::AmbiguousProjectName(name.to_string())),
                }
            }
        };

        Ok(Enrichment {
            uuid: Some(uuid),
            email,
            roles,
            active_projects,
            is_fleet_operator,
        })
    }
}
