use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::state::Attribute;
use crate::services::corrector::DEFAULT_DIRECTIVES;
use crate::services::image::ImageConfig;
use crate::services::llm::LlmConfig;

pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_build")]
    pub build_folder: String,

    #[serde(default)]
    pub unattended: bool,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub book: BookConfig,

    /// Used instead of the interactive questions when `unattended` is set.
    #[serde(default)]
    pub story: Option<StoryPreset>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BookConfig {
    #[serde(default = "default_max_attempts")]
    pub max_manuscript_attempts: usize,

    /// Keep the best failing manuscript instead of giving up.
    #[serde(default = "default_true")]
    pub accept_best_effort: bool,

    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,

    #[serde(default = "default_true")]
    pub generate_cover: bool,

    /// Appended to every illustration prompt.
    #[serde(default = "default_directives")]
    pub directives: Vec<String>,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            max_manuscript_attempts: default_max_attempts(),
            accept_best_effort: true,
            cooldown_seconds: default_cooldown(),
            generate_cover: true,
            directives: default_directives(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StoryPreset {
    pub name: String,
    pub species: String,
    pub topic: String,
    pub style: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

fn default_output() -> String {
    "output".to_string()
}
fn default_build() -> String {
    "build".to_string()
}
fn default_max_attempts() -> usize {
    3
}
fn default_cooldown() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_directives() -> Vec<String> {
    DEFAULT_DIRECTIVES.iter().map(|d| d.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output(),
            build_folder: default_build(),
            unattended: false,
            llm: LlmConfig::default(),
            image: ImageConfig::default(),
            book: BookConfig::default(),
            story: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new(CONFIG_FILE))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.build_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("config.yml");
        fs::write(&path, "llm:\n  provider: ollama\n  ollama:\n    model: llama3\n")?;

        let config = Config::load_from(&path)?;
        assert_eq!(config.output_folder, "output");
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.ollama.as_ref().unwrap().base_url, "http://localhost:11434");
        assert_eq!(config.image.aspect_ratio, "1:1");
        assert_eq!(config.book.max_manuscript_attempts, 3);
        assert!(config.book.accept_best_effort);
        assert_eq!(config.book.directives.len(), DEFAULT_DIRECTIVES.len());
        assert!(config.story.is_none());
        Ok(())
    }

    #[test]
    fn test_story_preset_and_save_roundtrip() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("config.yml");
        fs::write(
            &path,
            r#"
unattended: true
book:
  cooldown_seconds: 5
  accept_best_effort: false
story:
  name: Marcel
  species: badger
  topic: bravery
  style: cozy
  attributes:
    - item: hat
      color: yellow
"#,
        )?;

        let config = Config::load_from(&path)?;
        assert!(config.unattended);
        assert_eq!(config.book.cooldown_seconds, 5);
        assert!(!config.book.accept_best_effort);
        let story = config.story.as_ref().unwrap();
        assert_eq!(story.attributes[0].color, "yellow");

        config.save_to(&path)?;
        let reloaded = Config::load_from(&path)?;
        assert_eq!(reloaded.story.unwrap().name, "Marcel");
        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Config::load_from(Path::new("/nonexistent/config.yml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
