//! Static model catalog.
//!
//! Concrete provider adapters are out of scope (SPEC_FULL.md §6.2); this
//! bundles just enough metadata for `catalog_max_output_tokens` lookups and
//! the `list-models` CLI command, grounded on the teacher's
//! `sven-model::catalog` shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCatalogEntry {
    pub provider: String,
    pub name: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
}

/// The bundled static catalog. A real deployment's config supplies
/// provider-specific entries through the (out-of-scope) adapter; this list
/// exists so `ozzie-session`'s budget math and the `list-models` CLI command
/// have something deterministic to report against.
pub fn all() -> Vec<ModelCatalogEntry> {
    vec![
        ModelCatalogEntry {
            provider: "mock".into(),
            name: "mock-model".into(),
            context_window: 128_000,
            max_output_tokens: 8_192,
        },
        ModelCatalogEntry {
            provider: "local".into(),
            name: "llama".into(),
            context_window: 32_768,
            max_output_tokens: 4_096,
        },
    ]
}

pub fn lookup(provider: &str, name: &str) -> Option<ModelCatalogEntry> {
    all().into_iter().find(|e| e.provider == provider && e.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_mock_model() {
        let e = lookup("mock", "mock-model").unwrap();
        assert_eq!(e.max_output_tokens, 8_192);
    }

    #[test]
    fn lookup_unknown_model_returns_none() {
        assert!(lookup("openai", "gpt-99").is_none());
    }
}
