use super::value::{Field, Value};
use serde::Serialize;

/// A keyed field of a [`Block`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub key: String,
    pub field: Field,
}

/// An insertion-ordered mapping from field name to [`Field`].
///
/// Comments live in the same sequence under a synthetic `comment_<n>` key,
/// `n` being the position of the line inside its block, so that writing the
/// block back out visits every line in its original order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Block {
    entries: Vec<Entry>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.entries.iter().map(|e| (e.key.as_str(), &e.field))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.position(key).map(|i| &self.entries[i].field)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Field> {
        self.position(key).map(|i| &mut self.entries[i].field)
    }

    /// Scalar value stored under `key`.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.get(key).and_then(Field::as_scalar)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.value(key).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.value(key).and_then(Value::as_f64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.value(key).and_then(Value::as_str)
    }

    /// Sets `key` to `field`.
    ///
    /// An existing key keeps its position and the previous field is returned;
    /// a new key is appended at the end of the block.
    pub fn insert(&mut self, key: impl Into<String>, field: impl Into<Field>) -> Option<Field> {
        let key = key.into();
        let field = field.into();
        match self.position(&key) {
            Some(i) => Some(std::mem::replace(&mut self.entries[i].field, field)),
            None => {
                self.entries.push(Entry { key, field });
                None
            }
        }
    }

    /// Appends a comment line, returning the key it was stored under.
    pub fn push_comment(&mut self, text: impl Into<String>) -> String {
        let mut position = self.entries.len();
        let mut key = format!("comment_{position}");
        while self.contains_key(&key) {
            position += 1;
            key = format!("comment_{position}");
        }
        self.entries.push(Entry {
            key: key.clone(),
            field: Field::Comment(text.into()),
        });
        key
    }

    pub fn remove(&mut self, key: &str) -> Option<Field> {
        self.position(key).map(|i| self.entries.remove(i).field)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }
}

impl<'a> IntoIterator for &'a Block {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<K: Into<String>, F: Into<Field>> FromIterator<(K, F)> for Block {
    fn from_iter<I: IntoIterator<Item = (K, F)>>(iter: I) -> Self {
        let mut block = Block::new();
        for (key, field) in iter {
            block.insert(key, field);
        }
        block
    }
}
