//! Id → name/category lookup
//!
//! Capture never consults metadata except for the optional category filter;
//! reporting code asks a [`MetadataProvider`] and falls back to the numeric id.

use std::collections::HashMap;
use std::sync::Arc;

/// Display metadata for one instrumentation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceMeta {
    pub id: i32,
    pub name: String,
    pub category: Option<String>,
}

/// Source of [`TraceMeta`] entries.
pub trait MetadataProvider: Send + Sync {
    fn get(&self, id: i32) -> Option<TraceMeta>;
}

/// Fixed table of metadata entries.
#[derive(Debug, Default, Clone)]
pub struct DictionaryMetadataProvider {
    entries: HashMap<i32, TraceMeta>,
}

impl DictionaryMetadataProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `id`.
    pub fn add(&mut self, id: i32, name: impl Into<String>, category: Option<&str>) {
        self.entries.insert(
            id,
            TraceMeta { id, name: name.into(), category: category.map(str::to_string) },
        );
    }

    #[must_use]
    pub fn with(mut self, id: i32, name: impl Into<String>, category: Option<&str>) -> Self {
        self.add(id, name, category);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MetadataProvider for DictionaryMetadataProvider {
    fn get(&self, id: i32) -> Option<TraceMeta> {
        self.entries.get(&id).cloned()
    }
}

/// Ordered chain of providers; the first one that knows an id wins.
#[derive(Default, Clone)]
pub struct CompositeMetadataProvider {
    providers: Vec<Arc<dyn MetadataProvider>>,
}

impl CompositeMetadataProvider {
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn MetadataProvider>>) -> Self {
        Self { providers }
    }

    pub fn push(&mut self, provider: Arc<dyn MetadataProvider>) {
        self.providers.push(provider);
    }

    #[must_use]
    pub fn providers(&self) -> &[Arc<dyn MetadataProvider>] {
        &self.providers
    }
}

impl MetadataProvider for CompositeMetadataProvider {
    fn get(&self, id: i32) -> Option<TraceMeta> {
        self.providers.iter().find_map(|p| p.get(id))
    }
}

impl std::fmt::Debug for CompositeMetadataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeMetadataProvider")
            .field("providers", &self.providers.len())
            .finish()
    }
}

/// Name to show for `id`, falling back to the id itself.
#[must_use]
pub fn display_name(provider: Option<&dyn MetadataProvider>, id: i32) -> String {
    match provider.and_then(|p| p.get(id)) {
        Some(meta) if !meta.name.is_empty() => meta.name,
        _ => id.to_string(),
    }
}

/// Stable 32-bit id for a category name (FNV-1a).
///
/// The empty name maps to 0, the "uncategorized" id.
#[must_use]
pub fn category_id(name: &str) -> i32 {
    const OFFSET: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    if name.is_empty() {
        return 0;
    }

    let mut hash = OFFSET;
    for byte in name.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }

    // Reinterpret; 0 stays reserved for "uncategorized".
    let id = i32::from_ne_bytes(hash.to_ne_bytes());
    if id == 0 { 1 } else { id }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_falls_back_to_id() {
        assert_eq!(display_name(None, 42), "42");

        let provider = DictionaryMetadataProvider::new().with(42, "parse", Some("io"));
        assert_eq!(display_name(Some(&provider), 42), "parse");
        assert_eq!(display_name(Some(&provider), 7), "7");
    }

    #[test]
    fn test_composite_first_match_wins() {
        let first = DictionaryMetadataProvider::new().with(1, "first", None);
        let second =
            DictionaryMetadataProvider::new().with(1, "second", None).with(2, "only-second", None);

        let composite = CompositeMetadataProvider::new(vec![Arc::new(first), Arc::new(second)]);

        assert_eq!(composite.get(1).map(|m| m.name), Some("first".to_string()));
        assert_eq!(composite.get(2).map(|m| m.name), Some("only-second".to_string()));
        assert!(composite.get(3).is_none());
    }

    #[test]
    fn test_category_id_is_stable() {
        assert_eq!(category_id(""), 0);
        assert_eq!(category_id("io"), category_id("io"));
        assert_ne!(category_id("io"), category_id("cpu"));
        assert_ne!(category_id("io"), 0);
    }
}
