//! Recognition and extraction of sensitive item keys.
//!
//! A key is sensitive when it starts with the sensitive prefix and ends with
//! the path delimiter; the part in between is the ciphertext handed to the
//! tagging protocol.

use crate::config::QueryConfig;
use crate::error::GatewayError;
use crate::models::QueryDocument;
use regex::Regex;
use tracing::{debug, info};

/// Classification of a single item key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyClass<'a> {
    Clear,
    /// Carries the captured ciphertext.
    Sensitive(&'a str),
}

/// A sensitive term and where it sits in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensitiveTerm {
    pub panel: usize,
    pub item: usize,
    pub ciphertext: String,
}

/// Sensitive terms in document order (panel-major, item-minor).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedTerms {
    terms: Vec<SensitiveTerm>,
}

impl ExtractedTerms {
    pub fn terms(&self) -> &[SensitiveTerm] {
        &self.terms
    }

    /// The ciphertexts in the order the tagging protocol must receive them.
    pub fn ciphertexts(&self) -> Vec<String> {
        self.terms.iter().map(|t| t.ciphertext.clone()).collect()
    }

    pub fn contains(&self, ciphertext: &str) -> bool {
        self.terms.iter().any(|t| t.ciphertext == ciphertext)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Splits item keys into clear and sensitive ones and rewrites tagged keys.
#[derive(Debug, Clone)]
pub struct TermClassifier {
    pattern: Regex,
    tagged_prefix: String,
    delimiter: String,
}

impl TermClassifier {
    pub fn new(config: &QueryConfig) -> Result<Self, GatewayError> {
        let pattern = Regex::new(&format!(
            "^{}(.+){}$",
            regex::escape(&config.sensitive_prefix),
            regex::escape(&config.path_delimiter)
        ))
        .map_err(GatewayError::config)?;

        let classifier = Self {
            pattern,
            tagged_prefix: config.tagged_prefix.clone(),
            delimiter: config.path_delimiter.clone(),
        };

        // A tagged key must never be picked up again as sensitive.
        let sample = classifier.tagged_key("sample");
        if classifier.pattern.is_match(&sample) {
            return Err(GatewayError::Config(format!(
                "tagged prefix '{}' collides with sensitive prefix '{}'",
                config.tagged_prefix, config.sensitive_prefix
            )));
        }

        Ok(classifier)
    }

    pub fn classify<'a>(&self, key: &'a str) -> KeyClass<'a> {
        match self.pattern.captures(key).and_then(|c| c.get(1)) {
            Some(m) => KeyClass::Sensitive(m.as_str()),
            None => KeyClass::Clear,
        }
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        self.pattern.is_match(key)
    }

    /// Key the local engine is queried with for a tag.
    pub fn tagged_key(&self, token: &str) -> String {
        format!("{}{}{}", self.tagged_prefix, token, self.delimiter)
    }

    /// Collect the sensitive terms of a document.
    ///
    /// Panels mixing clear and sensitive items are accepted as they are.
    pub fn extract(&self, document: &QueryDocument) -> ExtractedTerms {
        let mut terms = Vec::new();

        for (p, panel) in document.panels.iter().enumerate() {
            for (i, item) in panel.items.iter().enumerate() {
                if let KeyClass::Sensitive(ciphertext) = self.classify(&item.item_key) {
                    debug!("Extracted item {}; panel={}, item={}", ciphertext, p, i);
                    terms.push(SensitiveTerm {
                        panel: p,
                        item: i,
                        ciphertext: ciphertext.to_string(),
                    });
                }
            }
        }

        info!(
            "Extracted {} encrypted query terms for query {}",
            terms.len(),
            document.query_name
        );

        ExtractedTerms { terms }
    }
}
