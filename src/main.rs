use anyhow::{Context, Result};

use lessonbot::config::Config;
use lessonbot::lbdb::Store;
use lessonbot::{lbbot, lessons};

#[tokio::main]
async fn main() -> Result<()> {
    // Begin logger
    env_logger::init();

    let config = Config::from_env()?;

    // Initialize database
    let store = Store::open(&config.database_path)
        .with_context(|| format!("Couldn't open database at {}", config.database_path.display()))?;

    if let Some(path) = &config.lessons_path {
        let seeded = lessons::seed_from_file(&store, path)?;
        log::info!("Seeded {seeded} new lessons from {}.", path.display());
    }

    let catalog = store.query_lessons()?;
    match catalog.last() {
        Some(last) => log::info!("Catalog has {} lessons, ending with \"{}\".", catalog.len(), last.title),
        None => log::warn!("The lesson catalog is empty. Nobody can enroll until LESSONS_PATH is set."),
    }

    lbbot::run_lessonbot(config, store).await
}
