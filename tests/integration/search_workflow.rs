use std::collections::HashSet;
use std::sync::Arc;

use skillsift::indexing::{Indexer, IndexerConfig};
use skillsift::search::{
    MatchType, SearchOptions, SearchService, SearchServiceConfig, VectorStore,
};
use skillsift::storage::SkillStore;
use skillsift::test_utils::{SkillFixture, sample_skills};
use skillsift::utils::CancelToken;

fn indexed_fixture() -> SkillFixture {
    let fixture = SkillFixture::new();
    fixture.seed(sample_skills());
    Indexer::new(fixture.db.clone(), fixture.vectors.clone(), IndexerConfig::default())
        .index_pending(&CancelToken::new(), None)
        .expect("indexing failed");
    fixture
}

fn service(fixture: &SkillFixture) -> SearchService {
    SearchService::new(
        fixture.db.clone() as Arc<dyn SkillStore>,
        Some(fixture.vectors.clone() as Arc<dyn VectorStore>),
        SearchServiceConfig::default(),
    )
}

#[test]
fn test_keyword_in_body_is_content_match_with_snippet() -> Result<(), String> {
    let fixture = indexed_fixture();
    let results = service(&fixture)
        .search("goroutines", &SearchOptions::default())
        .map_err(|e| e.to_string())?;

    let found = results
        .content_matches
        .iter()
        .find(|m| m.skill.id == "go-concurrency")
        .ok_or("go-concurrency not found")?;
    assert_eq!(found.match_type, MatchType::Content);
    let highlighted: Vec<_> = found
        .snippets
        .iter()
        .flat_map(|s| s.highlights.iter().map(|h| s.text[h.start..h.end].to_lowercase()))
        .collect();
    assert!(highlighted.contains(&"goroutines".to_string()));
    Ok(())
}

#[test]
fn test_tag_hit_is_title_match() -> Result<(), String> {
    let fixture = indexed_fixture();
    let results = service(&fixture)
        .search("sqlite", &SearchOptions::default())
        .map_err(|e| e.to_string())?;
    assert!(
        results
            .title_matches
            .iter()
            .any(|m| m.skill.id == "sqlite-fts" && m.snippets.is_empty())
    );
    Ok(())
}

#[test]
fn test_skill_found_by_both_methods_appears_once() -> Result<(), String> {
    let fixture = indexed_fixture();
    let options = SearchOptions {
        threshold: Some(0.01),
        ..SearchOptions::default()
    };
    let results = service(&fixture)
        .search("rust error handling", &options)
        .map_err(|e| e.to_string())?;

    let ids: Vec<_> = results.iter().map(|m| m.skill.id.clone()).collect();
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(ids.len(), unique.len());
    assert_eq!(results.total_hits, ids.len());
    assert!(unique.contains(&"rust-errors".to_string()));
    Ok(())
}

#[test]
fn test_semantic_only_search_scores_come_from_vectors() -> Result<(), String> {
    let fixture = indexed_fixture();
    let options = SearchOptions {
        include_fts: false,
        threshold: Some(0.1),
        ..SearchOptions::default()
    };
    let results = service(&fixture)
        .search("Rust Error Handling", &options)
        .map_err(|e| e.to_string())?;
    let top = results.iter().next().ok_or("no semantic hits")?;
    assert_eq!(top.skill.id, "rust-errors");
    assert!(top.score > 0.1 && top.score <= 1.0);
    Ok(())
}

#[test]
fn test_removed_skill_is_not_returned() -> Result<(), String> {
    let fixture = indexed_fixture();
    assert!(fixture.db.delete_skill("release-notes").map_err(|e| e.to_string())?);

    let options = SearchOptions {
        threshold: Some(0.01),
        ..SearchOptions::default()
    };
    let results = service(&fixture)
        .search("release notes", &options)
        .map_err(|e| e.to_string())?;
    assert!(results.iter().all(|m| m.skill.id != "release-notes"));
    Ok(())
}

#[test]
fn test_stats_combine_both_stores() -> Result<(), String> {
    let fixture = indexed_fixture();
    let stats = service(&fixture).stats().map_err(|e| e.to_string())?;
    assert_eq!(stats.total_skills, 4);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.indexed_vectors, Some(4));
    assert!(stats.last_updated.is_some());
    Ok(())
}
