use proptest::prelude::*;

use skillsift::core::{Skill, content_hash, prepare};
use skillsift::search::HashEmbedder;

fn skill_strategy() -> impl Strategy<Value = Skill> {
    (
        "[A-Za-z ]{1,30}",
        "[a-z ,.]{0,80}",
        "[a-z ,.]{0,80}",
        "[a-z ,.\n]{0,200}",
        prop::collection::vec("[a-z]{1,10}", 0..5),
    )
        .prop_map(|(title, description, summary, content, tags)| {
            Skill::new(title)
                .with_description(description)
                .with_summary(summary)
                .with_content(content)
                .with_tags(tags)
        })
}

proptest! {
    #[test]
    fn test_hash_embedding_deterministic(text in ".*") {
        let embedder = HashEmbedder::new(64);
        let first = embedder.embed_text(&text);
        let second = embedder.embed_text(&text);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_hash_embedding_length(text in ".*", dim in 1usize..256usize) {
        let embedder = HashEmbedder::new(dim);
        prop_assert_eq!(embedder.embed_text(&text).len(), dim);
    }

    #[test]
    fn test_content_hash_is_stable(skill in skill_strategy()) {
        prop_assert_eq!(content_hash(&skill), content_hash(&skill.clone()));
        prop_assert_eq!(prepare(&skill), prepare(&skill));
    }

    #[test]
    fn test_content_hash_ignores_tag_order_and_id(skill in skill_strategy()) {
        let mut reordered = skill.clone().with_id("another-id");
        reordered.tags.reverse();
        reordered.embedding_id = "indexed".to_string();
        prop_assert_eq!(content_hash(&skill), content_hash(&reordered));
    }

    #[test]
    fn test_content_hash_follows_text_changes(skill in skill_strategy(), extra in "[a-z]{1,8}") {
        let base = content_hash(&skill);

        let mut changed = skill.clone();
        changed.title.push_str(&extra);
        prop_assert_ne!(&base, &content_hash(&changed));

        let mut changed = skill.clone();
        changed.content = format!("{} {extra}", changed.content);
        prop_assert_ne!(&base, &content_hash(&changed));

        let mut changed = skill.clone();
        changed.tags.push(skillsift::core::Tag::new(format!("9{extra}")));
        prop_assert_ne!(&base, &content_hash(&changed));
    }
}
