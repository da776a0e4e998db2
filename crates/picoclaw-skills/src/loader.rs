use std::path::{Path, PathBuf};
use tracing::debug;

/// One discovered skill.
#[derive(Debug, Clone)]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
    pub path: PathBuf,
}

/// Discovers `skills/<name>/SKILL.md` definitions across layered skill
/// directories. Directories are listed in precedence order; a skill name
/// already seen is not overridden by a later directory.
pub struct SkillsLoader {
    skills_dirs: Vec<PathBuf>,
}

impl SkillsLoader {
    pub fn new(dirs: &[&Path]) -> Self {
        Self {
            skills_dirs: dirs.iter().map(|d| d.to_path_buf()).collect(),
        }
    }

    /// The workspace-only loader used by a single agent instance.
    pub fn for_workspace(workspace: &Path) -> Self {
        Self::new(&[&workspace.join("skills")])
    }

    /// List all discovered skills in precedence order.
    pub fn list_skills(&self) -> Vec<SkillInfo> {
        let mut skills: Vec<SkillInfo> = Vec::new();
        for dir in &self.skills_dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                debug!(?dir, "skills directory does not exist, skipping");
                continue;
            };
            let mut found: Vec<SkillInfo> = entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .filter_map(|e| {
                    let skill_md = e.path().join("SKILL.md");
                    let content = std::fs::read_to_string(&skill_md).ok()?;
                    let name = e.file_name().to_string_lossy().into_owned();
                    Some(SkillInfo {
                        description: extract_description(&content),
                        name,
                        path: skill_md,
                    })
                })
                .collect();
            found.sort_by(|a, b| a.name.cmp(&b.name));
            for skill in found {
                if !skills.iter().any(|s| s.name == skill.name) {
                    skills.push(skill);
                }
            }
        }
        skills
    }

    /// One line per skill for the system prompt, or empty when no skills
    /// are installed.
    pub fn build_skills_summary(&self) -> String {
        let skills = self.list_skills();
        if skills.is_empty() {
            return String::new();
        }
        skills
            .iter()
            .map(|s| {
                if s.description.is_empty() {
                    format!("- **{}** ({})", s.name, s.path.display())
                } else {
                    format!("- **{}**: {} ({})", s.name, s.description, s.path.display())
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Pull a short description out of SKILL.md: the frontmatter
/// `description:` field when present, else the first non-heading text
/// line.
fn extract_description(content: &str) -> String {
    let mut in_frontmatter = false;
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if i == 0 && trimmed == "---" {
            in_frontmatter = true;
            continue;
        }
        if in_frontmatter {
            if trimmed == "---" {
                in_frontmatter = false;
                continue;
            }
            if let Some(desc) = trimmed.strip_prefix("description:") {
                return desc.trim().to_string();
            }
            continue;
        }
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            return trimmed.to_string();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_description_frontmatter() {
        let content = "---\nname: kanban\ndescription: Track cards\n---\n\n# Kanban\nbody";
        assert_eq!(extract_description(content), "Track cards");
    }

    #[test]
    fn test_extract_description_first_text_line() {
        let content = "# Title\n\nDoes useful things.\nMore.";
        assert_eq!(extract_description(content), "Does useful things.");
    }

    #[test]
    fn test_discovery_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let skills = dir.path().join("skills");
        std::fs::create_dir_all(skills.join("alpha")).unwrap();
        std::fs::write(skills.join("alpha/SKILL.md"), "# Alpha\n\nFirst skill.").unwrap();
        std::fs::create_dir_all(skills.join("beta")).unwrap();
        std::fs::write(skills.join("beta/SKILL.md"), "# Beta").unwrap();
        // A directory without SKILL.md is ignored
        std::fs::create_dir_all(skills.join("not-a-skill")).unwrap();

        let loader = SkillsLoader::for_workspace(dir.path());
        let list = loader.list_skills();
        assert_eq!(list.len(), 2);

        let summary = loader.build_skills_summary();
        assert!(summary.contains("**alpha**: First skill."));
        assert!(summary.contains("**beta**"));
    }

    #[test]
    fn test_empty_summary_when_no_skills() {
        let dir = tempfile::tempdir().unwrap();
        let loader = SkillsLoader::for_workspace(dir.path());
        assert_eq!(loader.build_skills_summary(), "");
    }
}
