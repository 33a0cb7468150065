//! Generation requests and the submission-time validation gate.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::database::models::{JobKind, LanguageMode};
use crate::generation::error::{ErrorKind, GenerationError};

fn default_visibility() -> String {
    "private".to_string()
}

/// One item to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub item_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ItemSpec {
    pub fn new(item_ref: impl Into<String>) -> Self {
        Self {
            item_ref: item_ref.into(),
            title: None,
        }
    }

    pub fn titled(item_ref: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            item_ref: item_ref.into(),
            title: Some(title.into()),
        }
    }
}

/// An inbound generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub kind: JobKind,
    /// Source the items are fetched from (album, document, playlist...).
    pub source_ref: String,
    pub items: Vec<ItemSpec>,
    #[serde(default)]
    pub language_mode: LanguageMode,
    /// Requested languages. Empty means the configured default.
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default = "default_visibility")]
    pub target_visibility: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

/// One `(item, language)` pass through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Stable id recorded in `item_results` and used as the catalog key.
    pub item_id: String,
    pub item_ref: String,
    pub title: String,
    pub language: String,
}

impl GenerationRequest {
    /// Number of work units this request expands to.
    pub fn unit_count(&self) -> u32 {
        let per_item = match self.language_mode {
            LanguageMode::All => self.languages.len().max(1),
            LanguageMode::Single => 1,
        };
        self.items.len().saturating_mul(per_item).min(u32::MAX as usize) as u32
    }

    /// Validate and canonicalize a request.
    ///
    /// Nothing is persisted for a request rejected here.
    pub fn normalize(mut self, config: &GenerationConfig) -> Result<Self, GenerationError> {
        let invalid = |msg: String| GenerationError::validation(ErrorKind::InvalidRequest, msg);

        self.source_ref = self.source_ref.trim().to_string();
        if self.source_ref.is_empty() {
            return Err(invalid("source_ref must not be empty".to_string()));
        }

        if self.items.is_empty() {
            return Err(GenerationError::validation(
                ErrorKind::EmptyItems,
                "a generation request needs at least one item",
            ));
        }
        if self.kind == JobKind::SingleItem && self.items.len() != 1 {
            return Err(invalid(format!(
                "single-item request carries {} items",
                self.items.len()
            )));
        }

        let mut seen = HashSet::new();
        for item in &mut self.items {
            item.item_ref = item.item_ref.trim().to_string();
            if item.item_ref.is_empty() {
                return Err(invalid("item_ref must not be empty".to_string()));
            }
            if !seen.insert(item.item_ref.clone()) {
                return Err(invalid(format!("duplicate item_ref '{}'", item.item_ref)));
            }
        }

        let mut languages = Vec::new();
        for lang in self.languages.drain(..) {
            let lang = lang.trim().to_ascii_lowercase();
            if !lang.is_empty() && !languages.contains(&lang) {
                languages.push(lang);
            }
        }
        if languages.is_empty() {
            languages.push(config.default_language.clone());
        }
        if let Some(unsupported) = languages
            .iter()
            .find(|l| !config.supported_languages.contains(*l))
        {
            return Err(invalid(format!("unsupported language '{unsupported}'"))
                .with_context("language", unsupported.clone()));
        }
        if self.language_mode == LanguageMode::Single && languages.len() > 1 {
            return Err(invalid(format!(
                "language_mode single accepts one language, got {}",
                languages.len()
            )));
        }
        self.languages = languages;

        self.target_visibility = self.target_visibility.trim().to_string();
        if self.target_visibility.is_empty() {
            self.target_visibility = default_visibility();
        }

        let units = self.unit_count();
        if units > config.max_items_per_job {
            return Err(GenerationError::validation(
                ErrorKind::TooManyItems,
                format!(
                    "request expands to {units} items, limit is {}",
                    config.max_items_per_job
                ),
            )
            .with_context("total_items", units.to_string()));
        }

        Ok(self)
    }

    /// Expand into ordered work units: items in request order, then languages.
    pub fn work_units(&self) -> Vec<WorkUnit> {
        let fallback = String::from("en");
        let mut units = Vec::with_capacity(self.unit_count() as usize);
        for item in &self.items {
            let title = item.title.clone().unwrap_or_else(|| item.item_ref.clone());
            match self.language_mode {
                LanguageMode::Single => {
                    let language = self.languages.first().unwrap_or(&fallback).clone();
                    units.push(WorkUnit {
                        item_id: item.item_ref.clone(),
                        item_ref: item.item_ref.clone(),
                        title,
                        language,
                    });
                }
                LanguageMode::All => {
                    for language in &self.languages {
                        units.push(WorkUnit {
                            item_id: format!("{}:{}", item.item_ref, language),
                            item_ref: item.item_ref.clone(),
                            title: title.clone(),
                            language: language.clone(),
                        });
                    }
                }
            }
        }
        units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GenerationConfig {
        GenerationConfig {
            max_items_per_job: 6,
            supported_languages: vec!["en".into(), "de".into(), "ja".into()],
            ..GenerationConfig::default()
        }
    }

    fn album(items: &[&str], mode: LanguageMode, langs: &[&str]) -> GenerationRequest {
        GenerationRequest {
            kind: JobKind::MultiItem,
            source_ref: " album-7 ".to_string(),
            items: items.iter().map(|i| ItemSpec::new(*i)).collect(),
            language_mode: mode,
            languages: langs.iter().map(|l| l.to_string()).collect(),
            target_visibility: String::new(),
            style: None,
        }
    }

    #[test]
    fn test_normalize_defaults() {
        let req = album(&["a", "b"], LanguageMode::Single, &[])
            .normalize(&config())
            .unwrap();
        assert_eq!(req.source_ref, "album-7");
        assert_eq!(req.languages, vec!["en"]);
        assert_eq!(req.target_visibility, "private");
        assert_eq!(req.unit_count(), 2);
    }

    #[test]
    fn test_empty_items_rejected() {
        let err = album(&[], LanguageMode::Single, &[])
            .normalize(&config())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::EmptyItems);
        assert!(err.is_validation());
    }

    #[test]
    fn test_ceiling_counts_language_variants() {
        // 3 items x 2 languages = 6 fits, 4 x 2 = 8 does not
        assert!(
            album(&["a", "b", "c"], LanguageMode::All, &["en", "DE"])
                .normalize(&config())
                .is_ok()
        );
        let err = album(&["a", "b", "c", "d"], LanguageMode::All, &["en", "de"])
            .normalize(&config())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TooManyItems);
        assert_eq!(err.context["total_items"], "8");
    }

    #[test]
    fn test_shape_errors() {
        let cfg = config();
        let dup = album(&["a", "a"], LanguageMode::Single, &[]).normalize(&cfg);
        assert_eq!(dup.unwrap_err().kind, ErrorKind::InvalidRequest);

        let mut single = album(&["a", "b"], LanguageMode::Single, &[]);
        single.kind = JobKind::SingleItem;
        assert_eq!(single.normalize(&cfg).unwrap_err().kind, ErrorKind::InvalidRequest);

        let lang = album(&["a"], LanguageMode::Single, &["fr"]).normalize(&cfg);
        assert_eq!(lang.unwrap_err().context["language"], "fr");

        let two = album(&["a"], LanguageMode::Single, &["en", "de"]).normalize(&cfg);
        assert!(two.is_err());
    }

    #[test]
    fn test_work_units_order() {
        let req = album(&["a", "b"], LanguageMode::All, &["en", "ja"])
            .normalize(&config())
            .unwrap();
        let ids: Vec<_> = req.work_units().into_iter().map(|u| u.item_id).collect();
        assert_eq!(ids, vec!["a:en", "a:ja", "b:en", "b:ja"]);

        let single = album(&["x"], LanguageMode::Single, &["de"])
            .normalize(&config())
            .unwrap();
        let units = single.work_units();
        assert_eq!(units[0].item_id, "x");
        assert_eq!(units[0].language, "de");
        assert_eq!(units[0].title, "x");
    }
}
