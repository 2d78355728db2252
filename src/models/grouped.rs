//! Insertion-ordered grouping of articles by source name.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Article, ArticleEntry};

/// Source name → items, in the order sources were first seen.
///
/// Serializes as a JSON object whose keys keep that order.
#[derive(Debug, Clone, PartialEq)]
pub struct Grouped<T> {
    groups: Vec<(String, Vec<T>)>,
}

/// Articles grouped by source, as extracted from the page.
pub type SourceGroup = Grouped<Article>;

/// Served payload: entries grouped by source with the key stripped.
pub type GroupedArticles = Grouped<ArticleEntry>;

impl<T> Default for Grouped<T> {
    fn default() -> Self {
        Self { groups: Vec::new() }
    }
}

impl<T> Grouped<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the list for a source.
    ///
    /// A repeated source keeps its original position but loses its
    /// previous items.
    pub fn insert_source(&mut self, name: impl Into<String>) -> &mut Vec<T> {
        let name = name.into();
        let index = match self.groups.iter().position(|(n, _)| *n == name) {
            Some(i) => {
                self.groups[i].1.clear();
                i
            }
            None => {
                self.groups.push((name, Vec::new()));
                self.groups.len() - 1
            }
        };
        &mut self.groups[index].1
    }

    /// Append an item, creating the source group on first use.
    pub fn push(&mut self, source: &str, item: T) {
        match self.groups.iter_mut().find(|(n, _)| n == source) {
            Some((_, items)) => items.push(item),
            None => self.groups.push((source.to_string(), vec![item])),
        }
    }

    pub fn get(&self, source: &str) -> Option<&[T]> {
        self.groups
            .iter()
            .find(|(n, _)| n == source)
            .map(|(_, items)| items.as_slice())
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[T])> {
        self.groups
            .iter()
            .map(|(n, items)| (n.as_str(), items.as_slice()))
    }

    /// Number of sources.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of items across all sources.
    pub fn total_items(&self) -> usize {
        self.groups.iter().map(|(_, items)| items.len()).sum()
    }

    pub fn into_inner(self) -> Vec<(String, Vec<T>)> {
        self.groups
    }
}

impl Grouped<Article> {
    /// Flatten into one sequence: source order first, then page order.
    pub fn flatten(self) -> Vec<Article> {
        self.groups
            .into_iter()
            .flat_map(|(_, articles)| articles)
            .collect()
    }
}

impl<T: Serialize> Serialize for Grouped<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.groups.len()))?;
        for (name, items) in &self.groups {
            map.serialize_entry(name, items)?;
        }
        map.end()
    }
}

struct GroupedVisitor<T>(PhantomData<T>);

impl<'de, T: Deserialize<'de>> Visitor<'de> for GroupedVisitor<T> {
    type Value = Grouped<T>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of source names to item lists")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut grouped = Grouped::new();
        while let Some((name, items)) = access.next_entry::<String, Vec<T>>()? {
            *grouped.insert_source(name) = items;
        }
        Ok(grouped)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Grouped<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(GroupedVisitor(PhantomData))
    }
}
