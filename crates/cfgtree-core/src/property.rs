//! Ordered property map with case-insensitive keys

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{normalize, PropertyValue};

/// A named property as written in the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
}

/// Insertion-ordered mapping from property name to value.
///
/// Lookups ignore ASCII case. Re-inserting an existing key replaces the value
/// in place, keeping the original position; the newest spelling is kept for
/// display.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Property>", into = "Vec<Property>")]
pub struct PropertyMap {
    entries: Vec<Property>,
    index: HashMap<String, usize>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.get_property(name).map(|p| &p.value)
    }

    pub fn get_property(&self, name: &str) -> Option<&Property> {
        self.index.get(&normalize(name)).map(|&i| &self.entries[i])
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.index.contains_key(&normalize(name))
    }

    /// Inserts or replaces a property, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) -> Option<PropertyValue> {
        let name = name.into();
        let key = normalize(&name);
        match self.index.get(&key) {
            Some(&i) => {
                let slot = &mut self.entries[i];
                slot.name = name;
                Some(std::mem::replace(&mut slot.value, value))
            }
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(Property { name, value });
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Property> {
        let i = self.index.remove(&normalize(name))?;
        let removed = self.entries.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    /// Overlays `other` on top of `self`, key by key.
    ///
    /// Arrays and nested classes are replaced wholesale.
    pub fn extend_from(&mut self, other: &PropertyMap) {
        for property in &other.entries {
            self.insert(property.name.clone(), property.value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|p| p.name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &PropertyValue> {
        self.entries.iter().map(|p| &p.value)
    }

    /// Removes and returns every entry matching `predicate`, preserving order.
    pub fn extract_if(&mut self, mut predicate: impl FnMut(&Property) -> bool) -> Vec<Property> {
        let (taken, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.entries).into_iter().partition(|p| predicate(p));
        *self = PropertyMap::from(kept);
        taken
    }
}

impl PartialEq for PropertyMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl From<Vec<Property>> for PropertyMap {
    fn from(properties: Vec<Property>) -> Self {
        let mut map = PropertyMap::new();
        for property in properties {
            map.insert(property.name, property.value);
        }
        map
    }
}

impl From<PropertyMap> for Vec<Property> {
    fn from(map: PropertyMap) -> Self {
        map.entries
    }
}

impl<S: Into<String>> FromIterator<(S, PropertyValue)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (S, PropertyValue)>>(iter: I) -> Self {
        let mut map = PropertyMap::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

impl IntoIterator for PropertyMap {
    type Item = Property;
    type IntoIter = std::vec::IntoIter<Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a PropertyMap {
    type Item = &'a Property;
    type IntoIter = std::slice::Iter<'a, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut map = PropertyMap::new();
        map.insert("displayName", "Car".into());
        assert_eq!(map.get("DISPLAYNAME").and_then(PropertyValue::as_text), Some("Car"));
        assert!(map.contains_key("displayname"));
    }

    #[test]
    fn reinsert_replaces_in_place() {
        let mut map = PropertyMap::new();
        map.insert("a", PropertyValue::Number(1.0));
        map.insert("b", PropertyValue::Number(2.0));
        let old = map.insert("A", PropertyValue::Number(3.0));
        assert_eq!(old, Some(PropertyValue::Number(1.0)));
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["A", "b"]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn remove_reindexes() {
        let mut map: PropertyMap = vec![
            ("x", PropertyValue::Number(1.0)),
            ("y", PropertyValue::Number(2.0)),
            ("z", PropertyValue::Number(3.0)),
        ]
        .into_iter()
        .collect();
        assert!(map.remove("X").is_some());
        assert_eq!(map.get("z"), Some(&PropertyValue::Number(3.0)));
        assert_eq!(map.get("y"), Some(&PropertyValue::Number(2.0)));
        assert!(map.remove("missing").is_none());
    }

    #[test]
    fn overlay_replaces_arrays_wholesale() {
        let mut base: PropertyMap = vec![
            ("x", PropertyValue::Number(1.0)),
            ("list", PropertyValue::Array(vec!["a".into(), "b".into()])),
        ]
        .into_iter()
        .collect();
        let child: PropertyMap = vec![("list", PropertyValue::Array(vec!["c".into()]))]
            .into_iter()
            .collect();
        base.extend_from(&child);
        assert_eq!(base.get("list"), Some(&PropertyValue::Array(vec!["c".into()])));
        assert_eq!(base.get("x"), Some(&PropertyValue::Number(1.0)));
    }

    #[test]
    fn extract_if_keeps_order_of_rest() {
        let mut map: PropertyMap = vec![
            ("a", PropertyValue::Number(1.0)),
            ("b", PropertyValue::Text("t".into())),
            ("c", PropertyValue::Number(3.0)),
        ]
        .into_iter()
        .collect();
        let taken = map.extract_if(|p| p.value.as_number().is_some());
        assert_eq!(taken.len(), 2);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["b"]);
        assert!(map.contains_key("B"));
    }
}
