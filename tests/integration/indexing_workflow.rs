use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::unbounded;

use skillsift::core::content_hash;
use skillsift::indexing::{BackgroundIndexer, IndexProgress, Indexer, IndexerConfig, IndexerState};
use skillsift::search::{HashEmbedder, HashVectorStore, VectorStore};
use skillsift::storage::SkillStore;
use skillsift::test_utils::{SkillFixture, sample_skills};
use skillsift::utils::CancelToken;

fn config(batch_size: usize) -> IndexerConfig {
    IndexerConfig {
        batch_size,
        retry_attempts: 2,
        retry_base_delay: Duration::from_millis(5),
    }
}

#[test]
fn test_indexer_embeds_all_pending_skills() -> Result<(), String> {
    let fixture = SkillFixture::new();
    fixture.seed(sample_skills());

    let indexer = Indexer::new(fixture.db.clone(), fixture.vectors.clone(), config(3));
    assert_eq!(indexer.pending_count().map_err(|e| e.to_string())?, 4);

    let summary = indexer
        .index_pending(&CancelToken::new(), None)
        .map_err(|e| e.to_string())?;
    assert_eq!(summary.completed, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(fixture.vectors.count().map_err(|e| e.to_string())?, 4);

    for skill in fixture.db.list_skills(10).map_err(|e| e.to_string())? {
        assert_eq!(skill.embedding_id, content_hash(&skill), "{}", skill.id);
    }
    assert_eq!(indexer.pending_count().map_err(|e| e.to_string())?, 0);
    Ok(())
}

#[test]
fn test_edited_skill_is_reindexed_alone() -> Result<(), String> {
    let fixture = SkillFixture::new();
    fixture.seed(sample_skills());
    let indexer = Indexer::new(fixture.db.clone(), fixture.vectors.clone(), config(10));
    indexer
        .index_pending(&CancelToken::new(), None)
        .map_err(|e| e.to_string())?;

    let mut edited = fixture
        .db
        .get_skill("rust-errors")
        .map_err(|e| e.to_string())?
        .ok_or("missing skill")?;
    edited.content.push_str(" Attach context with map_err.");
    let stored = fixture.db.save_skill(&edited).map_err(|e| e.to_string())?;
    assert!(stored.is_pending());

    // Saving unchanged content keeps the embedding.
    let untouched = fixture
        .db
        .get_skill("go-concurrency")
        .map_err(|e| e.to_string())?
        .ok_or("missing skill")?;
    assert!(!fixture.db.save_skill(&untouched).map_err(|e| e.to_string())?.is_pending());

    let summary = indexer
        .index_pending(&CancelToken::new(), None)
        .map_err(|e| e.to_string())?;
    assert_eq!(summary.total, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(fixture.vectors.count().map_err(|e| e.to_string())?, 4);
    Ok(())
}

#[test]
fn test_background_run_reports_progress_and_persists_vectors() -> Result<(), String> {
    let fixture = SkillFixture::new();
    fixture.seed(sample_skills());
    let background =
        BackgroundIndexer::new(fixture.db.clone(), fixture.vectors.clone(), config(1));

    let (tx, rx) = unbounded::<IndexProgress>();
    background
        .start(&CancelToken::new(), tx)
        .map_err(|e| e.to_string())?;
    let events: Vec<IndexProgress> = rx.iter().collect();
    background.wait();

    assert!(!background.is_running());
    let last = events.last().ok_or("no progress events")?;
    assert!(!last.running);
    assert_eq!(last.completed, 4);
    assert!(events[..events.len() - 1].iter().all(|e| e.running));
    let processed: Vec<_> = events[1..events.len() - 1]
        .iter()
        .map(IndexProgress::processed)
        .collect();
    assert_eq!(processed, vec![1, 2, 3, 4]);
    assert_eq!(
        background.last_run().map(|(state, _)| state),
        Some(IndexerState::Completed)
    );

    background.close().map_err(|e| e.to_string())?;
    drop(background);

    let reopened = HashVectorStore::open(
        fixture.data_path.join("vectors.db"),
        Arc::new(HashEmbedder::default()),
        skillsift::search::DEFAULT_MAX_TOKENS,
    )
    .map_err(|e| e.to_string())?;
    assert_eq!(reopened.count().map_err(|e| e.to_string())?, 4);
    Ok(())
}
