use std::path::PathBuf;
use tracing::{info, warn};

use picoclaw_core::{PicoError, Result};

const DEFAULT_CONTENT_BASE: &str = "https://raw.githubusercontent.com";
const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Parse an install spec `owner/repo[@branch]`. Splits on the last `@`
/// so branch names containing `@` stay with the repo part.
pub fn parse_install_spec(spec: &str) -> Result<(String, String)> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(PicoError::Skill("install spec is empty".into()));
    }

    let (repo, branch) = match spec.rsplit_once('@') {
        Some((repo, branch)) => (repo.trim(), branch.trim()),
        None => (spec, ""),
    };
    if spec.contains('@') && branch.is_empty() {
        return Err(PicoError::Skill(format!("branch is empty in spec: {spec}")));
    }
    if repo.is_empty() {
        return Err(PicoError::Skill(format!("repo is empty in spec: {spec}")));
    }
    if repo.matches('/').count() != 1 {
        return Err(PicoError::Skill(format!(
            "spec must be owner/repo[@branch]: {spec}"
        )));
    }
    let (owner, name) = repo.split_once('/').unwrap_or(("", ""));
    if owner.is_empty() || name.is_empty() {
        return Err(PicoError::Skill(format!(
            "spec must be owner/repo[@branch]: {spec}"
        )));
    }

    Ok((repo.to_string(), branch.to_string()))
}

/// Installs skills by fetching SKILL.md from a raw-content host into
/// `<workspace>/skills/<name>/`.
pub struct SkillInstaller {
    workspace: PathBuf,
    /// Raw-content base override; production default when None.
    base_url: Option<String>,
    /// API base for default-branch lookup; production default when None.
    api_base: Option<String>,
    client: reqwest::Client,
}

impl SkillInstaller {
    pub fn new(workspace: PathBuf) -> Self {
        Self {
            workspace,
            base_url: None,
            api_base: None,
            client: reqwest::Client::new(),
        }
    }

    /// Installer with both content and API bases pointed at `base`,
    /// for use against local fixtures.
    pub fn with_base(workspace: PathBuf, base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            workspace,
            base_url: Some(base.clone()),
            api_base: Some(base),
            client: reqwest::Client::new(),
        }
    }

    fn content_base(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_CONTENT_BASE)
    }

    fn api_base(&self) -> &str {
        self.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    /// Look up the repository's default branch via the configured API
    /// base. Falls back to "main" on any failure.
    pub async fn fetch_default_branch(&self, repo: &str) -> String {
        let url = format!("{}/repos/{}", self.api_base(), repo);
        let branch = async {
            let resp = self.client.get(&url).send().await.ok()?;
            if !resp.status().is_success() {
                return None;
            }
            let body: serde_json::Value = resp.json().await.ok()?;
            body.get("default_branch")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(String::from)
        }
        .await;
        match branch {
            Some(b) => b,
            None => {
                warn!(repo, "default branch lookup failed, assuming main");
                "main".to_string()
            }
        }
    }

    /// Install `repo` at `branch` (empty = default branch), optionally a
    /// `subpath` inside the repository. The skill lands at
    /// `skills/<last-segment-of-subpath-or-repo-name>/SKILL.md`.
    /// Refuses to overwrite an existing skill unless `force` is set.
    /// Returns the installed skill name.
    pub async fn install(
        &self,
        repo: &str,
        branch: &str,
        subpath: &str,
        force: bool,
    ) -> Result<String> {
        let subpath = subpath.trim().trim_matches('/');
        validate_subpath(subpath)?;

        let branch = if branch.is_empty() {
            self.fetch_default_branch(repo).await
        } else {
            branch.to_string()
        };

        let skill_name = if subpath.is_empty() {
            repo.rsplit('/').next().unwrap_or(repo).to_string()
        } else {
            subpath.rsplit('/').next().unwrap_or(subpath).to_string()
        };

        let target_dir = self.workspace.join("skills").join(&skill_name);
        if target_dir.exists() && !force {
            return Err(PicoError::Skill(format!(
                "skill directory already exists: {} (use force to overwrite)",
                target_dir.display()
            )));
        }

        let url = if subpath.is_empty() {
            format!("{}/{}/{}/SKILL.md", self.content_base(), repo, branch)
        } else {
            format!(
                "{}/{}/{}/{}/SKILL.md",
                self.content_base(),
                repo,
                branch,
                subpath
            )
        };

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PicoError::Skill(format!("fetch {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(PicoError::Skill(format!(
                "SKILL.md not found at {url} (HTTP {}) — check branch and path",
                resp.status().as_u16()
            )));
        }
        let content = resp
            .bytes()
            .await
            .map_err(|e| PicoError::Skill(format!("read {url}: {e}")))?;

        std::fs::create_dir_all(&target_dir)?;
        std::fs::write(target_dir.join("SKILL.md"), &content)?;
        info!(skill = %skill_name, repo, branch, "skill installed");

        Ok(skill_name)
    }
}

/// Reject subpaths that escape the repository tree: no `..` segments, no
/// empty segments.
fn validate_subpath(subpath: &str) -> Result<()> {
    if subpath.is_empty() {
        return Ok(());
    }
    for segment in subpath.split('/') {
        if segment.is_empty() || segment == ".." {
            return Err(PicoError::Skill(format!("invalid subpath: {subpath}")));
        }
    }
    Ok(())
}
