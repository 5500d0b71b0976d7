//! Request context variables.
//!
//! Each page request carries a flat table of string variables (query and
//! form values, server defaults from the configuration file).  An engine
//! copies them into its global scope when it is opened, so fragments can
//! read them by name.

use std::collections::HashMap;

/// String-valued variable table handed to each engine at open time.
#[derive(Debug, Clone, Default)]
pub struct VarStore {
    vars: HashMap<String, String>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or overwrite) a variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Get the string value of a variable.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Copy every variable of `other` into `self`, overwriting on conflict.
    ///
    /// Used to layer per-request values over configured defaults.
    pub fn overlay(&mut self, other: &VarStore) {
        for (k, v) in other.iter() {
            self.vars.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VarStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut store = VarStore::new();
        for (k, v) in iter {
            store.set(k, v);
        }
        store
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
