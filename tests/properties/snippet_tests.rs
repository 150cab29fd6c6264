use proptest::prelude::*;

use skillsift::search::snippet::{extract, query_terms};

proptest! {
    #[test]
    fn test_empty_and_single_char_queries_yield_nothing(
        content in ".{0,300}",
        single in "[a-zA-Z0-9]",
        max in 0usize..6,
    ) {
        prop_assert!(extract(&content, "", max).is_empty());
        prop_assert!(extract(&content, &single, max).is_empty());
    }

    #[test]
    fn test_highlights_are_in_bounds_and_match_terms(
        words in prop::collection::vec("[a-zA-Z]{1,9}", 1..80),
        query in prop::collection::vec("[a-zA-Z]{2,5}", 1..4),
        max in 1usize..6,
    ) {
        let content = words.join(" ");
        let query = query.join(" ");
        let terms = query_terms(&query);

        let snippets = extract(&content, &query, max);
        prop_assert!(snippets.len() <= max);
        for snippet in &snippets {
            for highlight in &snippet.highlights {
                prop_assert!(highlight.start <= highlight.end);
                prop_assert!(highlight.end <= snippet.text.len());
                let marked = snippet.text[highlight.start..highlight.end].to_ascii_lowercase();
                prop_assert!(terms.contains(&marked), "{marked:?} not in {terms:?}");
            }
        }
    }

    #[test]
    fn test_multibyte_content_never_panics(
        content in "[a-zé漢字 ]{0,200}",
        query in "[a-zé漢 ]{0,12}",
    ) {
        for snippet in extract(&content, &query, 3) {
            for highlight in &snippet.highlights {
                prop_assert!(snippet.text.is_char_boundary(highlight.start));
                prop_assert!(snippet.text.is_char_boundary(highlight.end));
            }
        }
    }
}
