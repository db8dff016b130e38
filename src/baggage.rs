//! Baggage: user-defined key/value context propagated alongside a trace.
//!
//! Baggage rides on a [`SpanContext`] and is inherited unchanged by every
//! child span. It is distinct from span attributes: attributes describe one
//! span, baggage describes the whole call chain.
//!
//! `Baggage` values are immutable. Updates produce a new `Baggage` rather
//! than mutating in place, so a child deriving extra entries never affects
//! its parent's view.
//!
//! [`SpanContext`]: crate::span_context::SpanContext

use std::collections::VecDeque;

/// An immutable, ordered collection of string key/value pairs.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Baggage(Option<VecDeque<(String, String)>>);

impl Baggage {
    /// The empty `Baggage`, as a constant.
    pub const EMPTY: Baggage = Baggage(None);

    /// Creates an empty `Baggage`.
    ///
    /// No allocation happens until an entry is added.
    pub fn new() -> Self {
        Baggage(None)
    }

    /// Creates a new `Baggage` from the given key-value collection.
    ///
    /// Later duplicate keys overwrite earlier ones.
    pub fn from_key_value<T, K, V>(entries: T) -> Self
    where
        T: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        entries
            .into_iter()
            .fold(Baggage::new(), |baggage, (key, value)| {
                baggage.with_entry(key, value)
            })
    }

    /// Retrieves the value for the given key, if it exists.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.as_ref().and_then(|entries| {
            entries
                .iter()
                .find_map(|(k, v)| (k == key).then_some(v.as_str()))
        })
    }

    /// Returns a new `Baggage` containing this baggage's entries plus the
    /// given key-value pair. An existing entry with the same key is replaced
    /// in place, preserving its position.
    pub fn with_entry<K, V>(&self, key: K, value: V) -> Baggage
    where
        K: Into<String>,
        V: Into<String>,
    {
        let (key, value) = (key.into(), value.into());
        let mut entries = self.0.clone().unwrap_or_else(|| VecDeque::with_capacity(1));
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push_back((key, value)),
        }
        Baggage(Some(entries))
    }

    /// Returns a new `Baggage` with the given key removed, if present.
    pub fn without_entry(&self, key: &str) -> Baggage {
        let mut owned = self.clone();
        if let Some(entries) = owned.0.as_mut() {
            if let Some(index) = entries.iter().position(|(k, _)| k == key) {
                entries.remove(index);
            }
            if entries.is_empty() {
                owned.0 = None;
            }
        }
        owned
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, |entries| entries.len())
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over the entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flatten()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_entry_does_not_mutate_original() {
        let baggage = Baggage::from_key_value(vec![("tenant", "acme")]);
        let derived = baggage.with_entry("request", "42");

        assert!(baggage.get("request").is_none());
        assert_eq!(derived.get("request"), Some("42"));
        assert_eq!(derived.get("tenant"), Some("acme"));
    }

    #[test]
    fn with_entry_replaces_in_place() {
        let baggage = Baggage::from_key_value(vec![("a", "1"), ("b", "2")]);
        let updated = baggage.with_entry("a", "3");

        assert_eq!(updated.get("a"), Some("3"));
        assert_eq!(
            updated.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn without_entry_removes_key() {
        let baggage = Baggage::from_key_value(vec![("a", "1"), ("b", "2")]);
        let removed = baggage.without_entry("a");

        assert!(removed.get("a").is_none());
        assert_eq!(removed.len(), 1);
        assert_eq!(baggage.len(), 2);
    }

    #[test]
    fn empty_baggage_does_not_allocate() {
        let baggage = Baggage::new();
        assert!(baggage.is_empty());
        assert_eq!(baggage, Baggage::EMPTY);
    }
}
