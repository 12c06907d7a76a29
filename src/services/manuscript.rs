use crate::core::state::{Manuscript, ManuscriptPage, StoryRequest, BOOK_PAGE_COUNT};
use crate::services::validator::ValidationReport;
use lazy_static::lazy_static;
use regex::Regex;

/// Sent by the text model after the last page; not part of the book.
pub const COMPLETION_MARKER: &str = "Project Complete!";

pub const DEFAULT_TITLE: &str = "A Storyteller Lab Creation";

lazy_static! {
    static ref PAGE_HEADER: Regex = Regex::new(r"(?m)^[ \t]*\**[ \t]*(\d{1,2})\.\**[ \t]+").unwrap();
    static ref PAGE_TEXT_LABEL: Regex = Regex::new(r"(?i)\**[ \t]*PAGE TEXT:[ \t]*\**").unwrap();
    static ref PROMPT_LABEL: Regex = Regex::new(r"(?i)\**[ \t]*ILLUSTRATION PROMPT:[ \t]*\**").unwrap();
}

/// One page as the text model wrote it, before the prompt is corrected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftPage {
    pub page: ManuscriptPage,
    pub illustration_prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftManuscript {
    pub title: Option<String>,
    pub pages: Vec<DraftPage>,
}

impl DraftManuscript {
    pub fn manuscript(&self) -> Manuscript {
        Manuscript::new(self.pages.iter().map(|p| p.page.clone()).collect())
    }

    pub fn title_or_default(&self) -> String {
        self.title.clone().unwrap_or_else(|| DEFAULT_TITLE.to_string())
    }
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```markdown") {
        s.trim_start_matches("```markdown").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

/// Value of a `TAG: value` line, e.g. `BOOK TITLE: Marcel's Big Day`.
pub fn extract_tagged(text: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"(?i){}:\s*(.+?)(?:\n|$)", regex::escape(tag));
    let re = Regex::new(&pattern).ok()?;
    let value = re
        .captures(text)?
        .get(1)?
        .as_str()
        .trim()
        .trim_matches(|c: char| c == '*' || c == '"' || c.is_whitespace())
        .to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Splits a manuscript response into pages. Numbered items that carry
/// neither a page text nor an illustration prompt are ignored, so a stray
/// numbered list in the preamble does not shift page numbers.
pub fn parse_manuscript(response: &str) -> DraftManuscript {
    let cleaned = strip_code_blocks(response);
    let body: String = cleaned
        .lines()
        .filter(|line| !line.contains(COMPLETION_MARKER))
        .collect::<Vec<_>>()
        .join("\n");

    let title = extract_tagged(&body, "BOOK TITLE");

    let starts: Vec<(usize, usize)> = PAGE_HEADER
        .find_iter(&body)
        .map(|m| (m.start(), m.end()))
        .collect();

    let mut pages = Vec::new();
    for (i, &(_, content_start)) in starts.iter().enumerate() {
        let content_end = starts.get(i + 1).map(|&(s, _)| s).unwrap_or(body.len());
        let segment = &body[content_start..content_end];

        let has_text = PAGE_TEXT_LABEL.is_match(segment);
        let has_prompt = PROMPT_LABEL.is_match(segment);
        if !has_text && !has_prompt {
            continue;
        }

        let mut parts = PROMPT_LABEL.splitn(segment, 2);
        let text_part = parts.next().unwrap_or_default();
        let prompt_part = parts.next().unwrap_or_default();

        let text = clean_field(&PAGE_TEXT_LABEL.replace_all(text_part, ""));
        let prompt = clean_field(prompt_part)
            .lines()
            .collect::<Vec<_>>()
            .join(" ");

        pages.push(DraftPage {
            page: ManuscriptPage::new(pages.len() + 1, &text),
            illustration_prompt: prompt,
        });
    }

    DraftManuscript { title, pages }
}

fn clean_field(raw: &str) -> String {
    raw.replace('*', "")
        .lines()
        .map(|l| l.trim().trim_matches('"').trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds the chat turns for a manuscript request and its revisions.
#[derive(Debug, Clone, Default)]
pub struct ManuscriptPrompts;

impl ManuscriptPrompts {
    pub fn new() -> Self {
        Self
    }

    pub fn system_prompt(&self) -> String {
        format!(
            r#"You are "The Storyteller", a children's book author writing simple, rhythmic picture books for toddlers and pre-readers (2-3 years old).

RULES:
1. The book has exactly {pages} pages.
2. Every page is one short sentence of at most 8 words, using only Level A (pre-reader) words.
3. Pages rhyme in pairs (AABB): page 1 rhymes with page 2, page 3 with page 4, and so on. Each pair uses a new sound.
4. Use strong rhythmic repetition ("stomp, stomp, stomp", "big, big, big").
5. Every illustration prompt shows the main character ALONE, doing something active. Never add friends, family, crowds or other characters. Never describe the character as watching or looking at something.
6. Every illustration prompt repeats the character's species and full outfit.

OUTPUT FORMAT:
BOOK TITLE: [a short, catchy title of 3-5 words]

1. **PAGE TEXT:** [the sentence]
   **ILLUSTRATION PROMPT:** [a clear, descriptive image prompt in the requested style]

2. **PAGE TEXT:** [...]
   **ILLUSTRATION PROMPT:** [...]

[Continue through page {pages}]

Do not add any other introduction or commentary. After the last page write: "{marker} The Storyteller's Manuscript is ready.""#,
            pages = BOOK_PAGE_COUNT,
            marker = COMPLETION_MARKER,
        )
    }

    pub fn story_prompt(&self, request: &StoryRequest) -> String {
        let profile = &request.profile;
        let mut prompt = format!(
            "Main character: {}\nTopic: {}\nStyle and mood: {}\n",
            profile.name, request.topic, request.style
        );
        prompt.push_str(&format!("CHARACTER DETAILS: {}\n", profile.describe()));
        prompt.push_str(&format!(
            "\nWrite the complete {}-page manuscript now.",
            BOOK_PAGE_COUNT
        ));
        prompt
    }

    pub fn revision_prompt(&self, report: &ValidationReport) -> String {
        format!(
            "The manuscript does not meet the rules yet:\n{}\n\nRewrite the complete {}-page manuscript in the same format, fixing every problem above.",
            report.feedback(),
            BOOK_PAGE_COUNT
        )
    }

    /// Illustration request for the front cover. Leaves the title out so the
    /// image stays free of lettering.
    pub fn cover_prompt(&self, request: &StoryRequest) -> String {
        format!(
            "Front cover illustration of {} smiling in the middle of the page, a picture book about {}, {}",
            request.profile.name, request.topic, request.style
        )
    }
}
