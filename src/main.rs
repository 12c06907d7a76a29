use anyhow::Result;
use std::sync::Arc;
use storyteller_lab::core::config::Config;
use storyteller_lab::core::io::NativeStorage;
use storyteller_lab::services::cooldown::CooldownStore;
use storyteller_lab::services::image::create_image_client;
use storyteller_lab::services::llm::create_llm;
use storyteller_lab::services::setup;
use storyteller_lab::services::workflow::BookWorkflow;
use storyteller_lab::utils::text::slugify;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM and image settings.");
            return Err(e);
        }
    };

    config.ensure_directories()?;

    let request = setup::collect_request(&mut config)?;

    // One client per collaborator for the whole run
    let llm = create_llm(&config.llm)?;
    let images = create_image_client(&config.image)?;
    let storage = Arc::new(NativeStorage::new());

    let workflow = BookWorkflow::new(config.clone(), llm, images, storage);
    let mut state = workflow.load_state().await?;
    let store = CooldownStore::new(state.cooldown, config.book.cooldown_seconds);

    println!("Writing a book about {} for {}...", request.topic, request.profile.describe());
    let book = workflow.run(&store, &request).await?;

    state.cooldown = store.state();
    state.completed_books.push(slugify(&book.title));
    workflow.save_state(&state).await?;

    if !book.diagnostics.is_empty() {
        println!(
            "Note: the manuscript still has {} unresolved problem(s), see manuscript.md.",
            book.diagnostics.len()
        );
    }
    println!("Book complete: {} ({})", book.title, workflow.book_dir(&book.title));
    Ok(())
}
