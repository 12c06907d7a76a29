use crate::core::config::Config;
use crate::core::io::Storage;
use crate::core::state::{Book, BookPage, CooldownState, StoryRequest, WorkflowState};
use crate::services::cooldown::{unix_now, CooldownStore};
use crate::services::corrector::PromptCorrector;
use crate::services::image::ImageClient;
use crate::services::llm::{chat_with_retry, ChatTurn, LlmClient};
use crate::services::manuscript::{parse_manuscript, DraftManuscript, ManuscriptPrompts};
use crate::services::validator::{ManuscriptValidator, ValidationReport};
use crate::utils::text::{append_clause, slugify};
use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// The manuscript the workflow settled on.
struct ChosenManuscript {
    draft: DraftManuscript,
    report: ValidationReport,
    attempts: usize,
}

pub struct BookWorkflow {
    config: Config,
    llm: Arc<dyn LlmClient>,
    images: Arc<dyn ImageClient>,
    storage: Arc<dyn Storage>,
    corrector: PromptCorrector,
    prompts: ManuscriptPrompts,
}

impl BookWorkflow {
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        images: Arc<dyn ImageClient>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let corrector = PromptCorrector::new(config.book.directives.clone());
        Self {
            config,
            llm,
            images,
            storage,
            corrector,
            prompts: ManuscriptPrompts::new(),
        }
    }

    fn state_path(&self) -> String {
        Path::new(&self.config.build_folder)
            .join("state.json")
            .to_string_lossy()
            .to_string()
    }

    pub async fn load_state(&self) -> Result<WorkflowState> {
        let path = self.state_path();
        if self.storage.exists(&path).await? {
            let bytes = self.storage.read(&path).await?;
            let content = String::from_utf8(bytes)?;
            serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path))
        } else {
            Ok(WorkflowState::default())
        }
    }

    pub async fn save_state(&self, state: &WorkflowState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;
        self.storage.write(&self.state_path(), content.as_bytes()).await?;
        Ok(())
    }

    /// Folder the book with `title` is written to.
    pub fn book_dir(&self, title: &str) -> String {
        Path::new(&self.config.output_folder)
            .join(slugify(title))
            .to_string_lossy()
            .to_string()
    }

    /// Generates one book through the shared cooldown store. A failed
    /// generation releases the store without starting a new window.
    pub async fn run(&self, store: &CooldownStore, request: &StoryRequest) -> Result<Book> {
        let now = unix_now();
        let permit = store.try_begin(now)?;
        let (book, cooldown) = self.generate(request, store.state(), now).await?;
        permit.complete(cooldown);
        Ok(book)
    }

    /// Writes, validates and illustrates a book. Returns the book with the
    /// cooldown updated to `now`; the cooldown passed in is checked first.
    pub async fn generate(
        &self,
        request: &StoryRequest,
        cooldown: CooldownState,
        now: u64,
    ) -> Result<(Book, CooldownState)> {
        if let Some(remaining) = cooldown.remaining(now, self.config.book.cooldown_seconds) {
            bail!("Please wait {} more seconds before generating another book", remaining);
        }

        let chosen = self.write_manuscript(request).await?;
        let book = self.illustrate(request, chosen).await?;
        self.save_book(&book).await?;

        Ok((book, cooldown.recorded(now)))
    }

    async fn write_manuscript(&self, request: &StoryRequest) -> Result<ChosenManuscript> {
        let validator = ManuscriptValidator::new().allow_words(request.profile.vocabulary());
        let system = self.prompts.system_prompt();
        let max_attempts = self.config.book.max_manuscript_attempts.max(1);

        let mut turns = vec![ChatTurn::user(self.prompts.story_prompt(request))];
        let mut best: Option<ChosenManuscript> = None;

        for attempt in 1..=max_attempts {
            info!("Requesting manuscript (attempt {}/{})", attempt, max_attempts);
            let response =
                chat_with_retry(self.llm.as_ref(), &self.config.llm, &system, &turns).await?;
            let draft = parse_manuscript(&response);
            let report = validator.validate(&draft.manuscript());

            for warning in &report.warnings {
                warn!("{}", warning);
            }

            if report.pass {
                info!("Manuscript accepted on attempt {}", attempt);
                return Ok(ChosenManuscript { draft, report, attempts: attempt });
            }

            warn!(
                "Manuscript attempt {} has {} problem(s)",
                attempt,
                report.diagnostics.len()
            );
            debug!("{}", report.feedback());

            turns.push(ChatTurn::model(response));
            turns.push(ChatTurn::user(self.prompts.revision_prompt(&report)));

            let improves = best
                .as_ref()
                .map_or(true, |b| report.diagnostics.len() < b.report.diagnostics.len());
            if improves {
                best = Some(ChosenManuscript { draft, report, attempts: attempt });
            }
        }

        let mut best = best.context("No manuscript was generated")?;
        if !self.config.book.accept_best_effort {
            bail!(
                "Manuscript still invalid after {} attempts:\n{}",
                max_attempts,
                best.report.feedback()
            );
        }
        if best.draft.pages.is_empty() {
            bail!("The text model returned no pages in {} attempts", max_attempts);
        }

        warn!(
            "Keeping the manuscript from attempt {} with {} unresolved problem(s)",
            best.attempts,
            best.report.diagnostics.len()
        );
        best.attempts = max_attempts;
        Ok(best)
    }

    fn page_prompt(&self, raw: &str, request: &StoryRequest) -> String {
        let styled = if self.config.image.style.is_empty() {
            raw.to_string()
        } else {
            append_clause(raw, &self.config.image.style)
        };
        let corrected = self.corrector.correct(&styled, &request.profile);
        let issues = self.corrector.audit(&corrected, &request.profile);
        if !issues.is_empty() {
            debug!("Corrected prompt still has issues {:?}: {}", issues, corrected);
        }
        corrected
    }

    async fn render(&self, prompt: &str, dir: &str, stem: &str) -> Result<String> {
        let image = self
            .images
            .generate(prompt, &self.config.image.aspect_ratio)
            .await?;
        let path = format!("{}/{}.{}", dir, stem, image.extension());
        self.storage.write(&path, &image.bytes).await?;
        Ok(path)
    }

    async fn illustrate(&self, request: &StoryRequest, chosen: ChosenManuscript) -> Result<Book> {
        let title = chosen.draft.title_or_default();
        let book_dir = self.book_dir(&title);
        let existing = self.storage.list(&book_dir).await?;

        let pages: Vec<BookPage> = chosen
            .draft
            .pages
            .iter()
            .map(|p| BookPage {
                index: p.page.index,
                lines: p.page.lines.clone(),
                illustration_prompt: self.page_prompt(&p.illustration_prompt, request),
                image_path: None,
            })
            .collect();

        println!("Illustrating {} pages...", pages.len());
        let pb = ProgressBar::new(pages.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                .progress_chars("#>-"),
        );

        let book_dir_ref = &book_dir;
        let existing_ref = &existing;
        let results: Vec<(usize, Option<String>)> = futures_util::stream::iter(pages.iter())
            .map(|page| {
                let stem = format!("page_{:02}", page.index);
                let pb = pb.clone();
                async move {
                    let path = match find_existing(existing_ref, &stem) {
                        Some(path) => {
                            debug!("Reusing {}", path);
                            Some(path)
                        }
                        None => match self.render(&page.illustration_prompt, book_dir_ref, &stem).await {
                            Ok(path) => Some(path),
                            Err(e) => {
                                warn!("Illustration for page {} failed: {:#}", page.index, e);
                                None
                            }
                        },
                    };
                    pb.inc(1);
                    (page.index, path)
                }
            })
            .buffer_unordered(self.config.image.concurrency.max(1))
            .collect()
            .await;

        pb.finish_with_message("Illustrations complete");

        let mut image_paths: HashMap<usize, Option<String>> = results.into_iter().collect();
        let pages = pages
            .into_iter()
            .map(|mut page| {
                page.image_path = image_paths.remove(&page.index).flatten();
                page
            })
            .collect::<Vec<_>>();

        let cover_path = if self.config.book.generate_cover {
            self.illustrate_cover(request, &book_dir, &existing).await
        } else {
            None
        };

        let missing = pages.iter().filter(|p| p.image_path.is_none()).count();
        if missing > 0 {
            warn!("{} page(s) have no illustration", missing);
        }

        Ok(Book {
            title,
            topic: request.topic.clone(),
            style: request.style.clone(),
            profile: request.profile.clone(),
            pages,
            cover_path,
            attempts: chosen.attempts,
            diagnostics: chosen.report.diagnostics.iter().map(|d| d.to_string()).collect(),
            warnings: chosen.report.warnings,
        })
    }

    async fn illustrate_cover(
        &self,
        request: &StoryRequest,
        book_dir: &str,
        existing: &[String],
    ) -> Option<String> {
        if let Some(path) = find_existing(existing, "cover") {
            return Some(path);
        }
        let prompt = self.page_prompt(&self.prompts.cover_prompt(request), request);
        match self.render(&prompt, book_dir, "cover").await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Cover illustration failed: {:#}", e);
                None
            }
        }
    }

    async fn save_book(&self, book: &Book) -> Result<()> {
        let dir = self.book_dir(&book.title);
        let json = serde_json::to_string_pretty(book)?;
        self.storage
            .write(&format!("{}/book.json", dir), json.as_bytes())
            .await?;
        self.storage
            .write(&format!("{}/manuscript.md", dir), render_markdown(book).as_bytes())
            .await?;
        info!("Book saved to {}", dir);
        Ok(())
    }
}

/// Path in `entries` whose file name without extension is `stem`.
fn find_existing(entries: &[String], stem: &str) -> Option<String> {
    entries
        .iter()
        .find(|e| Path::new(e).file_stem().and_then(|s| s.to_str()) == Some(stem))
        .cloned()
}

pub fn render_markdown(book: &Book) -> String {
    let mut out = format!("# {}\n\n", book.title);
    out.push_str(&format!("*Starring {}*\n\n", book.profile.describe()));
    for page in &book.pages {
        out.push_str(&format!("## Page {}\n\n", page.index));
        for line in &page.lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&format!("\n> Illustration: {}\n\n", page.illustration_prompt));
    }
    if !book.diagnostics.is_empty() {
        out.push_str("## Unresolved problems\n\n");
        for d in &book.diagnostics {
            out.push_str(&format!("- {}\n", d));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::state::CharacterProfile;
    use crate::services::image::GeneratedImage;
    use crate::services::manuscript::tests::response_for;
    use crate::services::validator::tests::GOOD_PAGES;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;

    const NOW: u64 = 1_700_000_000;

    /// Replays `responses` in order, repeating the last one.
    #[derive(Debug)]
    struct MockLlmClient {
        responses: Vec<String>,
        call_count: Arc<Mutex<usize>>,
        turn_counts: Arc<Mutex<Vec<usize>>>,
    }

    impl MockLlmClient {
        fn new(responses: Vec<String>) -> Self {
            Self {
                responses,
                call_count: Arc::new(Mutex::new(0)),
                turn_counts: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn chat(&self, _system: &str, turns: &[ChatTurn]) -> Result<String> {
            let mut count = self.call_count.lock().unwrap();
            let response = self.responses[(*count).min(self.responses.len() - 1)].clone();
            *count += 1;
            self.turn_counts.lock().unwrap().push(turns.len());
            Ok(response)
        }
    }

    #[derive(Debug)]
    struct MockImageClient {
        fail_on: Option<String>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl MockImageClient {
        fn new(fail_on: Option<&str>) -> Self {
            Self {
                fail_on: fail_on.map(str::to_string),
                prompts: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl ImageClient for MockImageClient {
        async fn generate(&self, prompt: &str, aspect_ratio: &str) -> Result<GeneratedImage> {
            assert_eq!(aspect_ratio, "1:1");
            self.prompts.lock().unwrap().push(prompt.to_string());
            if let Some(marker) = &self.fail_on {
                if prompt.contains(marker.as_str()) {
                    return Err(anyhow::anyhow!("Mock image error"));
                }
            }
            Ok(GeneratedImage {
                bytes: vec![0u8; 8],
                mime_type: "image/png".to_string(),
            })
        }
    }

    fn test_config(root: &Path) -> Config {
        let mut config = Config::default();
        config.output_folder = root.join("output").to_string_lossy().to_string();
        config.build_folder = root.join("build").to_string_lossy().to_string();
        config.llm.retry_count = 0;
        config.llm.retry_delay_seconds = 0;
        config.book.cooldown_seconds = 300;
        config
    }

    fn request() -> StoryRequest {
        StoryRequest {
            profile: CharacterProfile::new("Marcel", "badger")
                .with_attribute("hat", "yellow")
                .with_attribute("vest", "blue")
                .with_attribute("shorts", "orange"),
            topic: "a rainy day".to_string(),
            style: "cozy".to_string(),
        }
    }

    fn bad_response() -> String {
        let mut pages = GOOD_PAGES.to_vec();
        pages[8] = "The rain and photosynthesis feed the cat.";
        response_for(&pages)
    }

    fn workflow(config: Config, llm: MockLlmClient, images: MockImageClient) -> BookWorkflow {
        BookWorkflow::new(config, Arc::new(llm), Arc::new(images), Arc::new(NativeStorage::new()))
    }

    #[tokio::test]
    async fn test_valid_manuscript_produces_full_book() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = test_config(temp_dir.path());

        let llm = MockLlmClient::new(vec![response_for(&GOOD_PAGES)]);
        let calls = llm.call_count.clone();
        let images = MockImageClient::new(None);
        let prompts = images.prompts.clone();
        let workflow = workflow(config, llm, images);

        let (book, cooldown) = workflow
            .generate(&request(), CooldownState::default(), NOW)
            .await?;

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(cooldown.last_generation_time, Some(NOW));
        assert_eq!(book.title, "Marcel's Big Day");
        assert_eq!(book.attempts, 1);
        assert!(book.diagnostics.is_empty());
        assert_eq!(book.pages.len(), 16);
        assert!(book.pages.iter().all(|p| p.image_path.is_some()));
        assert!(book.cover_path.is_some());

        // 16 pages plus the cover, all corrected
        let sent = prompts.lock().unwrap().clone();
        assert_eq!(sent.len(), 17);
        for prompt in &sent {
            assert!(prompt.contains("badger"));
            assert!(prompt.contains("blue vest"));
            assert!(prompt.contains("orange shorts"));
            assert!(prompt.contains("only one character in the scene"));
        }

        let dir = temp_dir.path().join("output").join("marcels_big_day");
        assert!(dir.join("book.json").exists());
        assert!(dir.join("page_01.png").exists());
        assert!(dir.join("page_16.png").exists());
        assert!(dir.join("cover.png").exists());
        let markdown = fs::read_to_string(dir.join("manuscript.md"))?;
        assert!(markdown.starts_with("# Marcel's Big Day"));
        assert!(markdown.contains("## Page 16"));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_manuscript_is_regenerated_with_feedback() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = test_config(temp_dir.path());

        let llm = MockLlmClient::new(vec![bad_response(), response_for(&GOOD_PAGES)]);
        let calls = llm.call_count.clone();
        let turns = llm.turn_counts.clone();
        let workflow = workflow(config, llm, MockImageClient::new(None));

        let (book, _) = workflow
            .generate(&request(), CooldownState::default(), NOW)
            .await?;

        assert_eq!(*calls.lock().unwrap(), 2);
        // request, first draft, feedback
        assert_eq!(*turns.lock().unwrap(), vec![1, 3]);
        assert_eq!(book.attempts, 2);
        assert!(book.diagnostics.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_gives_up_after_configured_attempts() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let mut config = test_config(temp_dir.path());
        config.book.accept_best_effort = false;

        let llm = MockLlmClient::new(vec![bad_response()]);
        let calls = llm.call_count.clone();
        let images = MockImageClient::new(None);
        let prompts = images.prompts.clone();
        let workflow = workflow(config, llm, images);

        let err = workflow
            .generate(&request(), CooldownState::default(), NOW)
            .await
            .unwrap_err();

        assert_eq!(*calls.lock().unwrap(), 3);
        assert!(err.to_string().contains("photosynthesis"));
        assert!(prompts.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_best_effort_keeps_fewest_problems() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = test_config(temp_dir.path());

        let mut short = GOOD_PAGES[..10].to_vec();
        short[3] = "It bounces up to the sun.";
        let llm = MockLlmClient::new(vec![
            response_for(&short),
            bad_response(),
            response_for(&GOOD_PAGES[..12]),
        ]);
        let workflow = workflow(config, llm, MockImageClient::new(None));

        let (book, _) = workflow
            .generate(&request(), CooldownState::default(), NOW)
            .await?;

        assert_eq!(book.attempts, 3);
        assert_eq!(book.pages.len(), 16);
        assert_eq!(book.diagnostics.len(), 1);
        assert!(book.diagnostics[0].contains("photosynthesis"));
        Ok(())
    }

    #[tokio::test]
    async fn test_active_cooldown_rejects_before_any_call() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = test_config(temp_dir.path());

        let llm = MockLlmClient::new(vec![response_for(&GOOD_PAGES)]);
        let calls = llm.call_count.clone();
        let workflow = workflow(config, llm, MockImageClient::new(None));

        let cooldown = CooldownState::default().recorded(NOW - 100);
        let err = workflow.generate(&request(), cooldown, NOW).await.unwrap_err();

        assert!(err.to_string().contains("200 more seconds"));
        assert_eq!(*calls.lock().unwrap(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_page_image_is_recorded_as_missing() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = test_config(temp_dir.path());

        let llm = MockLlmClient::new(vec![response_for(&GOOD_PAGES)]);
        let workflow = workflow(config, llm, MockImageClient::new(Some("scene 5,")));

        let (book, _) = workflow
            .generate(&request(), CooldownState::default(), NOW)
            .await?;

        let missing: Vec<usize> = book
            .pages
            .iter()
            .filter(|p| p.image_path.is_none())
            .map(|p| p.index)
            .collect();
        assert_eq!(missing, vec![5]);
        Ok(())
    }

    #[tokio::test]
    async fn test_rerun_reuses_existing_images() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = test_config(temp_dir.path());

        let dir = temp_dir.path().join("output").join("marcels_big_day");
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("page_01.jpg"), b"old")?;
        fs::write(dir.join("cover.png"), b"old")?;

        let llm = MockLlmClient::new(vec![response_for(&GOOD_PAGES)]);
        let images = MockImageClient::new(None);
        let prompts = images.prompts.clone();
        let workflow = workflow(config, llm, images);

        let (book, _) = workflow
            .generate(&request(), CooldownState::default(), NOW)
            .await?;

        assert_eq!(prompts.lock().unwrap().len(), 15);
        assert!(book.pages[0].image_path.as_deref().unwrap().ends_with("page_01.jpg"));
        assert_eq!(fs::read(dir.join("page_01.jpg"))?, b"old");
        Ok(())
    }

    #[tokio::test]
    async fn test_run_through_store_and_state_roundtrip() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = test_config(temp_dir.path());

        let llm = MockLlmClient::new(vec![response_for(&GOOD_PAGES)]);
        let calls = llm.call_count.clone();
        let workflow = workflow(config, llm, MockImageClient::new(None));

        let mut state = workflow.load_state().await?;
        assert_eq!(state.cooldown, CooldownState::default());

        let store = CooldownStore::new(state.cooldown, 300);
        workflow.run(&store, &request()).await?;
        assert!(store.get_last_generation_time().is_some());

        let err = workflow.run(&store, &request()).await.unwrap_err();
        assert!(err.to_string().contains("more seconds"));
        assert_eq!(*calls.lock().unwrap(), 1);

        state.cooldown = store.state();
        state.completed_books.push("marcels_big_day".to_string());
        workflow.save_state(&state).await?;

        let reloaded = workflow.load_state().await?;
        assert_eq!(reloaded.cooldown, store.state());
        assert_eq!(reloaded.completed_books, vec!["marcels_big_day"]);
        Ok(())
    }
}
