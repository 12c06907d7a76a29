use crate::core::state::{Manuscript, BOOK_PAGE_COUNT};
use crate::services::rhyme::{RhymeMatcher, SuffixRhyme};
use crate::services::vocabulary::is_level_a;
use crate::utils::text::words;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// One violated manuscript rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    PageCountMismatch { expected: usize, actual: usize },
    /// `pair_index` is 1-based: pages (1,2) are pair 1, pages (3,4) pair 2.
    RhymeSchemeViolation { pair_index: usize, reason: String },
    VocabularyViolation { word: String, page_index: usize },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::PageCountMismatch { expected, actual } => {
                write!(f, "The manuscript must have exactly {} pages, but it has {}.", expected, actual)
            }
            Diagnostic::RhymeSchemeViolation { pair_index, reason } => {
                write!(f, "Rhyme pair {} breaks the AABB scheme: {}.", pair_index, reason)
            }
            Diagnostic::VocabularyViolation { word, page_index } => {
                write!(f, "Page {} uses \"{}\", which is not a Level A word.", page_index, word)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub pass: bool,
    pub diagnostics: Vec<Diagnostic>,
    /// Style notes that do not fail the manuscript.
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Diagnostics as a bullet list, ready to send back to the text model.
    pub fn feedback(&self) -> String {
        self.diagnostics
            .iter()
            .map(|d| format!("- {}", d))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct ManuscriptValidator {
    rhyme: Box<dyn RhymeMatcher>,
    extra_words: HashSet<String>,
}

impl Default for ManuscriptValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ManuscriptValidator {
    pub fn new() -> Self {
        Self {
            rhyme: Box::new(SuffixRhyme::new()),
            extra_words: HashSet::new(),
        }
    }

    pub fn with_rhyme_matcher(mut self, matcher: Box<dyn RhymeMatcher>) -> Self {
        self.rhyme = matcher;
        self
    }

    /// Treats `words` as Level A, e.g. the protagonist's name and colors.
    pub fn allow_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extra_words
            .extend(words.into_iter().map(|w| w.as_ref().to_lowercase()));
        self
    }

    /// Rhyme key of each page's final word, in page order.
    pub fn rhyme_scheme(&self, manuscript: &Manuscript) -> Vec<Option<String>> {
        manuscript
            .pages
            .iter()
            .map(|p| p.final_word().and_then(|w| self.rhyme.rhyme_key(&w)))
            .collect()
    }

    pub fn validate(&self, manuscript: &Manuscript) -> ValidationReport {
        let mut diagnostics = Vec::new();
        let mut warnings = Vec::new();

        self.check_page_count(manuscript, &mut diagnostics);
        self.check_rhymes(manuscript, &mut diagnostics, &mut warnings);
        self.check_vocabulary(manuscript, &mut diagnostics);

        ValidationReport {
            pass: diagnostics.is_empty(),
            diagnostics,
            warnings,
        }
    }

    fn check_page_count(&self, manuscript: &Manuscript, diagnostics: &mut Vec<Diagnostic>) {
        if manuscript.len() != BOOK_PAGE_COUNT {
            diagnostics.push(Diagnostic::PageCountMismatch {
                expected: BOOK_PAGE_COUNT,
                actual: manuscript.len(),
            });
        }
    }

    fn check_rhymes(
        &self,
        manuscript: &Manuscript,
        diagnostics: &mut Vec<Diagnostic>,
        warnings: &mut Vec<String>,
    ) {
        let scheme = self.rhyme_scheme(manuscript);
        let mut previous_key: Option<String> = None;

        // A trailing odd page has no partner; the page count check covers it.
        for (i, pair) in manuscript.pages.chunks_exact(2).enumerate() {
            let pair_index = i + 1;
            let (left, right) = (&pair[0], &pair[1]);

            let (Some(left_word), Some(right_word)) = (left.final_word(), right.final_word()) else {
                let empty = if left.final_word().is_none() { left.index } else { right.index };
                diagnostics.push(Diagnostic::RhymeSchemeViolation {
                    pair_index,
                    reason: format!("page {} has no final word", empty),
                });
                previous_key = None;
                continue;
            };

            if !self.rhyme.rhymes(&left_word, &right_word) {
                diagnostics.push(Diagnostic::RhymeSchemeViolation {
                    pair_index,
                    reason: format!(
                        "\"{}\" (page {}) does not rhyme with \"{}\" (page {})",
                        left_word, left.index, right_word, right.index
                    ),
                });
                previous_key = None;
                continue;
            }

            let key = scheme[i * 2].clone();
            if key.is_some() && key == previous_key {
                warnings.push(format!(
                    "Rhyme pairs {} and {} share the same sound \"{}\"",
                    pair_index - 1,
                    pair_index,
                    key.as_deref().unwrap_or_default()
                ));
            }
            previous_key = key;
        }
    }

    fn check_vocabulary(&self, manuscript: &Manuscript, diagnostics: &mut Vec<Diagnostic>) {
        for page in &manuscript.pages {
            let mut reported = HashSet::new();
            for line in &page.lines {
                for word in words(line) {
                    if is_level_a(&word, &self.extra_words) || !reported.insert(word.clone()) {
                        continue;
                    }
                    diagnostics.push(Diagnostic::VocabularyViolation {
                        word,
                        page_index: page.index,
                    });
                }
            }
        }
    }
}

/// Validates with the default rhyme matcher and the plain Level A list.
pub fn validate(manuscript: &Manuscript) -> ValidationReport {
    ManuscriptValidator::new().validate(manuscript)
}
