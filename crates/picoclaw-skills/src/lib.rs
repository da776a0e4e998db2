//! # picoclaw-skills
//!
//! Workspace skills: discovery of `skills/<name>/SKILL.md` definitions
//! for the system prompt, and the `owner/repo[@branch][ subpath]`
//! installer that fetches SKILL.md from a raw-content host.

pub mod installer;
pub mod loader;

pub use installer::{SkillInstaller, parse_install_spec};
pub use loader::SkillsLoader;
