//! Materialized result objects.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::query::value::Value;

/// One materialized entity with its expanded navigations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Entry {
    properties: Vec<(String, Value)>,
    navigations: Vec<(String, NavigationValue)>,
}

/// Value of one expanded navigation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NavigationValue {
    /// Single-valued navigation; `None` when the row carried no entity.
    Single(Option<Box<Entry>>),
    /// Collection-valued navigation, in row order.
    Collection(Vec<Entry>),
}

impl Entry {
    pub(crate) fn with_capacity(properties: usize, navigations: usize) -> Self {
        Self {
            properties: Vec::with_capacity(properties),
            navigations: Vec::with_capacity(navigations),
        }
    }

    pub(crate) fn push_property(&mut self, name: String, value: Value) {
        self.properties.push((name, value));
    }

    pub(crate) fn push_navigation(&mut self, name: String, value: NavigationValue) {
        self.navigations.push((name, value));
    }

    /// Scalar properties in declaration order.
    pub fn properties(&self) -> &[(String, Value)] {
        &self.properties
    }

    /// Navigations in declaration order.
    pub fn navigations(&self) -> &[(String, NavigationValue)] {
        &self.navigations
    }

    /// Property value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Replaces a property, appending it when absent.
    pub fn set(&mut self, name: &str, value: Value) {
        match self.properties.iter_mut().find(|(key, _)| key == name) {
            Some((_, slot)) => *slot = value,
            None => self.properties.push((name.to_owned(), value)),
        }
    }

    /// Navigation value by name.
    pub fn navigation(&self, name: &str) -> Option<&NavigationValue> {
        self.navigations
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Entities of a collection navigation; empty when absent or single.
    pub fn children(&self, name: &str) -> &[Entry] {
        match self.navigation(name) {
            Some(NavigationValue::Collection(entries)) => entries,
            _ => &[],
        }
    }

    /// Entity of a single-valued navigation.
    pub fn single(&self, name: &str) -> Option<&Entry> {
        match self.navigation(name) {
            Some(NavigationValue::Single(Some(entry))) => Some(entry),
            _ => None,
        }
    }

    /// Writes `value` to the property at the end of `path`, following
    /// single-valued navigations. Returns `false` when the path crosses a
    /// collection or an absent entity.
    pub(crate) fn set_path(&mut self, path: &[String], value: Value) -> bool {
        match path {
            [] => false,
            [property] => {
                self.set(property, value);
                true
            }
            [navigation, rest @ ..] => {
                let target = self
                    .navigations
                    .iter_mut()
                    .find(|(key, _)| key == navigation)
                    .map(|(_, nav)| nav);
                match target {
                    Some(NavigationValue::Single(Some(entry))) => entry.set_path(rest, value),
                    _ => false,
                }
            }
        }
    }
}

impl Serialize for Entry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.properties.len() + self.navigations.len()))?;
        for (name, value) in &self.properties {
            map.serialize_entry(name, value)?;
        }
        for (name, value) in &self.navigations {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
