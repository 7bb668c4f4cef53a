//! Persons known for a document, injected into person-centric prompts.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// Alternative ways a person is referred to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonNames {
    #[serde(default)]
    pub abbreviations: BTreeSet<String>,
    #[serde(default)]
    pub aliases: BTreeSet<String>,
}

/// A person already resolved for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub full_name: String,
    #[serde(default)]
    pub abbreviations: BTreeSet<String>,
    #[serde(default)]
    pub aliases: BTreeSet<String>,
}

impl Person {
    pub fn new(id: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            full_name: full_name.into(),
            abbreviations: BTreeSet::new(),
            aliases: BTreeSet::new(),
        }
    }

    pub fn with_abbreviation(mut self, abbreviation: impl Into<String>) -> Self {
        self.abbreviations.insert(abbreviation.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    pub fn with_names(mut self, names: PersonNames) -> Self {
        self.abbreviations.extend(names.abbreviations);
        self.aliases.extend(names.aliases);
        self
    }

    /// Abbreviations and aliases, detached from the person.
    pub fn names(&self) -> PersonNames {
        PersonNames {
            abbreviations: self.abbreviations.clone(),
            aliases: self.aliases.clone(),
        }
    }
}

/// Person id -> person, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonDirectory {
    persons: IndexMap<String, Person>,
}

impl PersonDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, person: Person) {
        self.persons.insert(person.id.clone(), person);
    }

    /// Insert or replace every person of `other`.
    pub fn extend(&mut self, other: PersonDirectory) {
        self.persons.extend(other.persons);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.persons.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Person> {
        self.persons.get(id)
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Person> {
        self.persons.values()
    }

    /// JSON object shown to the model: `{id: {full name, abbreviations, alias}}`.
    pub fn to_prompt_json(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .persons
            .values()
            .map(|p| {
                (
                    p.id.clone(),
                    json!({
                        "full name": p.full_name,
                        "abbreviations": p.abbreviations,
                        "alias": p.aliases,
                    }),
                )
            })
            .collect();
        Value::Object(map)
    }
}

impl FromIterator<Person> for PersonDirectory {
    fn from_iter<I: IntoIterator<Item = Person>>(iter: I) -> Self {
        let mut directory = Self::new();
        for person in iter {
            directory.insert(person);
        }
        directory
    }
}
