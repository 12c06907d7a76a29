use crate::utils::text::{indefinite_article, words};
use serde::{Deserialize, Serialize};

/// Number of pages every finished book must have.
pub const BOOK_PAGE_COUNT: usize = 16;

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct WorkflowState {
    #[serde(default)]
    pub cooldown: CooldownState,
    #[serde(default)]
    pub completed_books: Vec<String>,
}

/// Timestamp of the last successful book generation, in unix seconds.
///
/// Passed into the workflow and handed back updated instead of living in a
/// global, so the gate can be tested with plain numbers.
#[derive(Serialize, Deserialize, Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CooldownState {
    pub last_generation_time: Option<u64>,
}

impl CooldownState {
    /// Seconds left before a new generation may start, or `None` when the
    /// window has elapsed (or nothing was ever generated).
    pub fn remaining(&self, now: u64, window_secs: u64) -> Option<u64> {
        let last = self.last_generation_time?;
        let ready_at = last.saturating_add(window_secs);
        if now < ready_at {
            Some(ready_at - now)
        } else {
            None
        }
    }

    pub fn recorded(self, now: u64) -> Self {
        Self {
            last_generation_time: Some(now),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub item: String,
    pub color: String,
}

impl Attribute {
    /// "yellow hat", the phrase the corrector looks for in prompts.
    pub fn phrase(&self) -> String {
        format!("{} {}", self.color, self.item)
    }

    /// "a yellow hat", "an orange vest", "blue shorts".
    pub fn with_article(&self) -> String {
        if self.item.ends_with('s') {
            return self.phrase();
        }
        format!("{} {}", indefinite_article(&self.color), self.phrase())
    }
}

/// The protagonist's fixed look. Built once per book and only read afterwards.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CharacterProfile {
    pub name: String,
    pub species: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl CharacterProfile {
    pub fn new(name: &str, species: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            species: species.trim().to_lowercase(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, item: &str, color: &str) -> Self {
        self.attributes.push(Attribute {
            item: item.trim().to_lowercase(),
            color: color.trim().to_lowercase(),
        });
        self
    }

    /// "a yellow hat, a blue vest, orange shorts"
    pub fn outfit(&self) -> String {
        self.attributes
            .iter()
            .map(Attribute::with_article)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn describe(&self) -> String {
        if self.attributes.is_empty() {
            format!("{} the {}", self.name, self.species)
        } else {
            format!("{} the {}, wearing {}", self.name, self.species, self.outfit())
        }
    }

    /// Words the profile contributes to a manuscript that a general
    /// vocabulary list cannot know about.
    pub fn vocabulary(&self) -> Vec<String> {
        let mut vocab = Vec::new();
        let sources = std::iter::once(self.name.as_str())
            .chain(std::iter::once(self.species.as_str()))
            .chain(
                self.attributes
                    .iter()
                    .flat_map(|a| [a.item.as_str(), a.color.as_str()]),
            );
        for source in sources {
            for word in source.split_whitespace() {
                let word = word.to_lowercase();
                if !vocab.contains(&word) {
                    vocab.push(word);
                }
            }
        }
        vocab
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoryRequest {
    pub profile: CharacterProfile,
    pub topic: String,
    pub style: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ManuscriptPage {
    /// 1-based page number.
    pub index: usize,
    pub lines: Vec<String>,
}

impl ManuscriptPage {
    pub fn new(index: usize, text: &str) -> Self {
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Self { index, lines }
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Last word of the last line, lowercased and stripped of punctuation.
    pub fn final_word(&self) -> Option<String> {
        self.lines
            .iter()
            .rev()
            .flat_map(|line| words(line).into_iter().rev())
            .next()
    }
}

/// Pages in reading order. Any length is representable; the validator is
/// what rejects books that are not exactly [`BOOK_PAGE_COUNT`] pages.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Manuscript {
    pub pages: Vec<ManuscriptPage>,
}

impl Manuscript {
    pub fn new(pages: Vec<ManuscriptPage>) -> Self {
        Self { pages }
    }

    pub fn from_texts<S: AsRef<str>>(texts: &[S]) -> Self {
        Self::new(
            texts
                .iter()
                .enumerate()
                .map(|(i, t)| ManuscriptPage::new(i + 1, t.as_ref()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BookPage {
    pub index: usize,
    pub lines: Vec<String>,
    pub illustration_prompt: String,
    /// `None` when the image collaborator failed for this page.
    pub image_path: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Book {
    pub title: String,
    pub topic: String,
    pub style: String,
    pub profile: CharacterProfile,
    pub pages: Vec<BookPage>,
    pub cover_path: Option<String>,
    pub attempts: usize,
    #[serde(default)]
    pub diagnostics: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marcel() -> CharacterProfile {
        CharacterProfile::new("Marcel", "Badger")
            .with_attribute("hat", "yellow")
            .with_attribute("vest", "blue")
            .with_attribute("shorts", "orange")
    }

    #[test]
    fn test_cooldown_remaining() {
        let empty = CooldownState::default();
        assert_eq!(empty.remaining(1_000, 60), None);

        let state = empty.recorded(1_000);
        assert_eq!(state.remaining(1_010, 60), Some(50));
        assert_eq!(state.remaining(1_060, 60), None);
        assert_eq!(state.remaining(5_000, 60), None);
    }

    #[test]
    fn test_profile_describe_uses_articles() {
        let profile = marcel();
        assert_eq!(
            profile.describe(),
            "Marcel the badger, wearing a yellow hat, a blue vest, orange shorts"
        );

        let owl = CharacterProfile::new("Pip", "owl").with_attribute("scarf", "orange");
        assert_eq!(owl.outfit(), "an orange scarf");
    }

    #[test]
    fn test_profile_vocabulary_is_lowercase_and_unique() {
        let profile = CharacterProfile::new("Marcel", "badger")
            .with_attribute("hat", "red")
            .with_attribute("rain boots", "red");
        assert_eq!(
            profile.vocabulary(),
            vec!["marcel", "badger", "hat", "red", "rain", "boots"]
        );
    }

    #[test]
    fn test_page_final_word_skips_punctuation() {
        let page = ManuscriptPage::new(1, "Little Lola loves to leap high.\nShe plays beneath the sky!  \n\n");
        assert_eq!(page.lines.len(), 2);
        assert_eq!(page.final_word().as_deref(), Some("sky"));

        let blank = ManuscriptPage::new(2, "  \n ...");
        assert_eq!(blank.final_word(), None);
    }

    #[test]
    fn test_workflow_state_defaults_when_fields_missing() {
        let state: WorkflowState = serde_json::from_str("{}").unwrap();
        assert_eq!(state.cooldown, CooldownState::default());
        assert!(state.completed_books.is_empty());
    }
}
