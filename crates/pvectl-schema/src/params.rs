use crate::digest::Digest;
use serde::Serialize;
use std::collections::BTreeMap;

/// Parameters of one configuration write: keys to set and keys to delete.
///
/// A key is never both set and deleted; the last call wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigParams {
    set: BTreeMap<String, String>,
    delete: Vec<String>,
}

impl ConfigParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.delete.retain(|k| *k != key);
        self.set.insert(key, value.into());
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        let key = key.into();
        self.set.remove(&key);
        if !self.delete.contains(&key) {
            self.delete.push(key);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.delete.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.set.get(key).map(String::as_str)
    }

    pub fn is_deleted(&self, key: &str) -> bool {
        self.delete.iter().any(|k| k == key)
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.set
    }

    pub fn deletes(&self) -> &[String] {
        &self.delete
    }

    /// Comma-joined delete list, `None` when nothing is deleted.
    pub fn delete_list(&self) -> Option<String> {
        if self.delete.is_empty() {
            None
        } else {
            Some(self.delete.join(","))
        }
    }

    pub fn extend(&mut self, other: ConfigParams) {
        for (k, v) in other.set {
            self.set(k, v);
        }
        for k in other.delete {
            self.delete(k);
        }
    }

    /// Flatten into form fields for the remote call, adding `delete` and the
    /// optional `digest` precondition.
    pub fn to_form(&self, digest: Option<&Digest>) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = self
            .set
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(list) = self.delete_list() {
            form.push(("delete".to_owned(), list));
        }
        if let Some(d) = digest {
            form.push(("digest".to_owned(), d.to_hex()));
        }
        form
    }
}
