//! Re-injection of tags into the query document.

use crate::models::{QueryDocument, QueryRequest, TAGGED_QUERY_OUTPUT_TYPES};
use crate::query::classifier::{ExtractedTerms, TermClassifier};
use tracing::{debug, warn};

/// What a substitution pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubstitutionSummary {
    /// Items actually rewritten.
    pub substituted: usize,
    /// Sensitive items extracted from the document.
    pub expected: usize,
    /// Tokens handed in.
    pub provided: usize,
}

impl SubstitutionSummary {
    pub fn is_consistent(&self) -> bool {
        self.expected == self.provided && self.substituted == self.expected
    }
}

/// Rewrite every extracted sensitive item with its token, in order.
///
/// Token `n` goes to the `n`-th extracted term. A count mismatch is logged
/// and the query goes on with the substitutions that could be made.
pub fn substitute(
    classifier: &TermClassifier,
    document: &mut QueryDocument,
    extracted: &ExtractedTerms,
    tokens: &[String],
) -> SubstitutionSummary {
    let mut substituted = 0;

    for (term, token) in extracted.terms().iter().zip(tokens) {
        let item = document
            .panels
            .get_mut(term.panel)
            .and_then(|panel| panel.items.get_mut(term.item));

        match item {
            Some(item) if classifier.is_sensitive(&item.item_key) => {
                item.item_key = classifier.tagged_key(token);
                substituted += 1;
                debug!("Tagged item; panel={}, item={}", term.panel, term.item);
            }
            _ => warn!(
                "Item at panel={}, item={} is no longer sensitive, left untouched",
                term.panel, term.item
            ),
        }
    }

    if extracted.len() != tokens.len() {
        warn!(
            "Mismatch in provided number of tagged items ({}) and number of encrypted items in query ({})",
            tokens.len(),
            extracted.len()
        );
    }

    SubstitutionSummary {
        substituted,
        expected: extracted.len(),
        provided: tokens.len(),
    }
}

/// Force the output types a tagged query must produce, whatever was asked.
pub fn override_output_types(request: &mut QueryRequest) {
    request.set_output_types(&TAGGED_QUERY_OUTPUT_TYPES);
}
