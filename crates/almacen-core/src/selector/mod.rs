//! Context selector: picks which knowledge documents go into a model prompt.
//!
//! Single pass over an in-memory snapshot:
//!
//! 1. extract query terms (lower-cased, punctuation stripped, >= 3 chars);
//! 2. score each document (+1 per term in content, +3 per term in title, substring match);
//! 3. choose the candidate order (stuff everything / ranked matches / 3 most recent);
//! 4. pack greedily under the token budget, stopping at the first document that does not fit;
//! 5. wrap the packed blocks with the strict or hybrid instruction template.
//!
//! The selector never fails and never mutates its inputs.

mod templates;

pub use templates::{InstructionTemplates, Locale, UnknownLocale};

use crate::knowledge::KnowledgeDocument;
use serde::{Deserialize, Serialize};

/// Characters removed from the query before splitting into terms.
const STRIPPED_PUNCTUATION: &[char] = &[
    '.', ',', '/', '#', '!', '$', '%', '^', '&', '*', ';', ':', '{', '}', '=', '-', '_', '`', '~',
    '(', ')',
];

/// Terms shorter than this (in characters) are ignored.
const MIN_TERM_CHARS: usize = 3;

const CONTENT_MATCH_WEIGHT: u32 = 1;
const TITLE_MATCH_WEIGHT: u32 = 3;

/// How many recent documents to fall back to when nothing scored and stuffing is not possible.
const RECENT_FALLBACK_COUNT: usize = 3;

/// Prompt fragment plus the ids of the documents embedded in it, in pack order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub prompt_fragment: String,
    pub used_document_ids: Vec<String>,
}

/// A document annotated with its relevance score for the duration of one call.
#[derive(Debug, Clone, Copy)]
pub struct ScoredDocument<'a> {
    pub document: &'a KnowledgeDocument,
    pub score: u32,
}

/// Splits a query into lower-cased search terms.
///
/// Duplicates are kept: a repeated term scores once per occurrence.
pub fn extract_terms(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .filter(|c| !STRIPPED_PUNCTUATION.contains(c))
        .collect();
    cleaned
        .split_whitespace()
        .filter(|term| term.chars().count() >= MIN_TERM_CHARS)
        .map(str::to_string)
        .collect()
}

/// Relevance score of one document for the given (already lower-cased) terms.
pub fn score_document(document: &KnowledgeDocument, terms: &[String]) -> u32 {
    if terms.is_empty() {
        return 0;
    }
    let content = document.content.to_lowercase();
    let title = document.title.to_lowercase();
    terms
        .iter()
        .map(|term| {
            let mut s = 0;
            if content.contains(term.as_str()) {
                s += CONTENT_MATCH_WEIGHT;
            }
            if title.contains(term.as_str()) {
                s += TITLE_MATCH_WEIGHT;
            }
            s
        })
        .sum()
}

/// Candidate documents in the order they should be offered to the packer.
fn candidate_order<'a>(
    scored: &[ScoredDocument<'a>],
    max_context_tokens: usize,
) -> Vec<&'a KnowledgeDocument> {
    let total_tokens: usize = scored.iter().map(|s| s.document.estimated_tokens).sum();
    let any_match = scored.iter().any(|s| s.score > 0);

    if !any_match && total_tokens < max_context_tokens {
        return scored.iter().map(|s| s.document).collect();
    }

    let mut ranked: Vec<ScoredDocument<'a>> =
        scored.iter().copied().filter(|s| s.score > 0).collect();
    // stable: equal scores keep their snapshot order
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    if !ranked.is_empty() {
        return ranked.into_iter().map(|s| s.document).collect();
    }

    let mut recent: Vec<&'a KnowledgeDocument> = scored.iter().map(|s| s.document).collect();
    recent.sort_by(|a, b| b.added_at_ms.cmp(&a.added_at_ms));
    recent.truncate(RECENT_FALLBACK_COUNT);
    recent
}

/// Greedy in-order packing. A document is taken only while the running total stays strictly
/// below the budget; the first one that does not fit ends the pass.
fn pack<'a>(
    candidates: &[&'a KnowledgeDocument],
    max_context_tokens: usize,
) -> Vec<&'a KnowledgeDocument> {
    let mut used = 0usize;
    let mut packed = Vec::new();
    for doc in candidates {
        if used + doc.estimated_tokens < max_context_tokens {
            used += doc.estimated_tokens;
            packed.push(*doc);
        } else {
            break;
        }
    }
    packed
}

/// Stateless selector bound to one locale.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextSelector {
    locale: Locale,
}

impl ContextSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locale(locale: Locale) -> Self {
        Self { locale }
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn templates(&self) -> &'static InstructionTemplates {
        self.locale.templates()
    }

    /// Scores every document against the query, preserving snapshot order.
    pub fn score<'a>(&self, query: &str, documents: &'a [KnowledgeDocument]) -> Vec<ScoredDocument<'a>> {
        let terms = extract_terms(query);
        documents
            .iter()
            .map(|document| ScoredDocument {
                document,
                score: score_document(document, &terms),
            })
            .collect()
    }

    /// Builds the prompt fragment for `query` from `documents` within `max_context_tokens`.
    pub fn select(
        &self,
        query: &str,
        documents: &[KnowledgeDocument],
        max_context_tokens: usize,
        strict: bool,
    ) -> SelectionResult {
        let scored = self.score(query, documents);
        let candidates = candidate_order(&scored, max_context_tokens);
        let packed = pack(&candidates, max_context_tokens);

        tracing::debug!(
            target: "almacen::selector",
            documents = documents.len(),
            candidates = candidates.len(),
            packed = packed.len(),
            strict,
            "context selected"
        );

        let templates = self.templates();
        if packed.is_empty() {
            let prompt_fragment = if strict {
                templates.no_documents.to_string()
            } else {
                String::new()
            };
            return SelectionResult {
                prompt_fragment,
                used_document_ids: Vec::new(),
            };
        }

        let blocks: Vec<String> = packed
            .iter()
            .map(|doc| templates.source_block(&doc.title, &doc.content))
            .collect();
        SelectionResult {
            prompt_fragment: templates.wrap_sources(strict, &blocks),
            used_document_ids: packed.iter().map(|doc| doc.id.clone()).collect(),
        }
    }
}

/// Selects context with the default locale.
pub fn select(
    query: &str,
    documents: &[KnowledgeDocument],
    max_context_tokens: usize,
    strict: bool,
) -> SelectionResult {
    ContextSelector::new().select(query, documents, max_context_tokens, strict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn doc(id: &str, title: &str, content: &str, added_at_ms: i64, tokens: usize) -> KnowledgeDocument {
        KnowledgeDocument {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            added_at_ms,
            estimated_tokens: tokens,
            is_system_owned: false,
        }
    }

    fn store_docs() -> Vec<KnowledgeDocument> {
        vec![
            doc("precios-id", "Precios", "Yerba Mate 1kg $3800", 1, 10),
            doc("políticas-id", "Políticas", "Horario 08 a 21", 2, 10),
        ]
    }

    #[test]
    fn terms_are_lowercased_stripped_and_filtered() {
        assert_eq!(
            extract_terms("¿Precio de la YERBA-mate, (1kg)?"),
            vec!["¿precio", "yerbamate", "1kg?"]
        );
        assert!(extract_terms("").is_empty());
        assert!(extract_terms("de la y o").is_empty());
    }

    #[test]
    fn terms_keep_duplicates() {
        assert_eq!(extract_terms("leche leche"), vec!["leche", "leche"]);
    }

    #[test]
    fn scoring_weights_title_over_content_and_matches_substrings() {
        let d = doc("a", "Lácteos", "Leche entera y lechera", 0, 5);
        assert_eq!(score_document(&d, &extract_terms("leche")), 1);
        assert_eq!(score_document(&d, &extract_terms("lácteos")), 3);
        assert_eq!(score_document(&d, &extract_terms("lech")), 1);
        assert_eq!(score_document(&d, &extract_terms("leche leche")), 2);
        assert_eq!(score_document(&d, &[]), 0);
    }

    #[test]
    fn strict_scenario_packs_only_matching_policy_document() {
        let docs = store_docs();
        let out = select("horario de atención", &docs, 1000, true);
        assert_eq!(out.used_document_ids, vec!["políticas-id"]);
        let t = Locale::Es.templates();
        assert!(out.prompt_fragment.starts_with(t.strict_preamble));
        assert!(out.prompt_fragment.contains("--- FUENTE: Políticas ---\nHorario 08 a 21\n"));
        assert!(!out.prompt_fragment.contains("Yerba Mate"));
    }

    #[test]
    fn no_match_small_total_stuffs_everything_in_order() {
        let docs = store_docs();
        let out = select("xyz-nonsense", &docs, 1000, true);
        assert_eq!(out.used_document_ids, vec!["precios-id", "políticas-id"]);
        let first = out.prompt_fragment.find("Yerba Mate").unwrap();
        let second = out.prompt_fragment.find("Horario 08").unwrap();
        assert!(first < second);
    }

    #[test]
    fn tiny_budget_packs_nothing() {
        let docs = store_docs();
        let strict = select("horario", &docs, 5, true);
        assert!(strict.used_document_ids.is_empty());
        assert_eq!(strict.prompt_fragment, Locale::Es.templates().no_documents);

        let hybrid = select("horario", &docs, 5, false);
        assert!(hybrid.used_document_ids.is_empty());
        assert!(hybrid.prompt_fragment.is_empty());
    }

    #[test]
    fn empty_inputs_are_valid() {
        let strict = select("", &[], 1000, true);
        assert!(strict.used_document_ids.is_empty());
        assert_eq!(strict.prompt_fragment, Locale::Es.templates().no_documents);
        assert_eq!(select("", &[], 1000, false), SelectionResult::default());
    }

    #[test]
    fn ranked_order_is_stable_for_equal_scores() {
        let docs = vec![
            doc("a", "Uno", "arroz", 0, 1),
            doc("b", "Dos", "nada", 0, 1),
            doc("c", "Tres", "arroz", 0, 1),
            doc("d", "Arroz", "arroz", 0, 1),
        ];
        let out = select("arroz", &docs, 100, true);
        assert_eq!(out.used_document_ids, vec!["d", "a", "c"]);
    }

    #[test]
    fn exact_budget_hit_is_excluded_and_stops_packing() {
        let docs = vec![
            doc("big", "Arroz largo", "arroz", 0, 6),
            doc("huge", "Arroz", "arroz", 0, 10),
            doc("small", "arroz", "x", 0, 1),
        ];
        // ranked: big(4), huge(4), small(3); huge would reach 16 so the pass ends there
        let out = select("arroz", &docs, 11, true);
        assert_eq!(out.used_document_ids, vec!["big"]);

        // 6 is not strictly below 6: nothing packed and the 1-token doc is never reached
        let out = select("arroz", &docs, 6, true);
        assert!(out.used_document_ids.is_empty());
    }

    #[test]
    fn oversized_unmatched_set_falls_back_to_three_most_recent() {
        let docs = vec![
            doc("old", "A", "aaa", 10, 40),
            doc("newest", "B", "bbb", 50, 10),
            doc("mid", "C", "ccc", 30, 10),
            doc("new", "D", "ddd", 40, 10),
        ];
        // total 70 >= 60, no matches
        let out = select("zzz", &docs, 60, false);
        assert_eq!(out.used_document_ids, vec!["newest", "new", "mid"]);
    }

    #[test]
    fn recent_fallback_still_respects_budget() {
        let docs = vec![doc("a", "A", "aaa", 1, 30), doc("b", "B", "bbb", 2, 30)];
        let out = select("zzz", &docs, 40, false);
        assert_eq!(out.used_document_ids, vec!["b"]);
    }

    #[test]
    fn title_match_packs_before_content_match() {
        let docs = vec![
            doc("content", "Varios", "incluye yerba", 0, 10),
            doc("title", "Yerba", "ver lista", 0, 10),
        ];
        let out = select("yerba", &docs, 15, true);
        assert_eq!(out.used_document_ids, vec!["title"]);
    }

    #[test]
    fn english_locale_uses_english_delimiters() {
        let out = ContextSelector::with_locale(Locale::En).select("xyz", &store_docs(), 1000, false);
        assert!(out.prompt_fragment.starts_with("HYBRID CONTEXT INSTRUCTIONS:"));
        assert!(out.prompt_fragment.contains("=== BEGIN SOURCES ===\n--- SOURCE: Precios ---\n"));
        assert!(out.prompt_fragment.ends_with("=== END SOURCES ===\n"));
    }

    #[test]
    fn selection_is_idempotent() {
        let docs = store_docs();
        assert_eq!(select("yerba", &docs, 1000, true), select("yerba", &docs, 1000, true));
    }

    fn arb_docs() -> impl Strategy<Value = Vec<KnowledgeDocument>> {
        prop::collection::vec(
            ("[a-z]{1,6}", "[a-zA-Z ]{0,24}", 0i64..1_000, 1usize..40),
            0..8,
        )
        .prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (title, content, added, tokens))| {
                    doc(&format!("doc-{i}"), &title, &content, added, tokens)
                })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn used_ids_appear_verbatim(docs in arb_docs(), query in "[a-zA-Z ]{0,16}", budget in 1usize..200, strict in any::<bool>()) {
            let out = select(&query, &docs, budget, strict);
            for id in &out.used_document_ids {
                let d = docs.iter().find(|d| &d.id == id).unwrap();
                prop_assert!(out.prompt_fragment.contains(&d.content));
            }
        }

        #[test]
        fn packing_is_monotonic_in_budget(docs in arb_docs(), query in "[a-z ]{0,16}", budget in 1usize..150, extra in 0usize..150) {
            let small = select(&query, &docs, budget, true);
            let large = select(&query, &docs, budget + extra, true);
            prop_assert!(large.used_document_ids.len() >= small.used_document_ids.len());
        }

        #[test]
        fn scoring_ignores_case(docs in arb_docs(), query in "[a-zA-Z ]{0,16}") {
            let upper = select(&query.to_uppercase(), &docs, 100, true);
            let lower = select(&query.to_lowercase(), &docs, 100, true);
            prop_assert_eq!(upper.used_document_ids, lower.used_document_ids);
        }

        #[test]
        fn unmatched_small_sets_are_stuffed_in_order(tokens in prop::collection::vec(1usize..10, 0..6)) {
            let docs: Vec<KnowledgeDocument> = tokens
                .iter()
                .enumerate()
                .map(|(i, t)| doc(&format!("d{i}"), "t", "c", i as i64, *t))
                .collect();
            let out = select("zzzz", &docs, 1000, false);
            let ids: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();
            prop_assert_eq!(out.used_document_ids, ids);
        }
    }
}
