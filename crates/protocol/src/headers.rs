use serde::{Deserialize, Serialize};

/// Ordered multimap of string headers attached to a call.
///
/// Keys are compared case-insensitively; insertion order and duplicate keys
/// are preserved. The transfer core never interprets headers itself, it only
/// hands them to the header-validation hook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, keeping any existing values for the same key.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Builder-style [`append`](Self::append).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.append(key, value);
        self
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// All values stored under `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Appends every entry of `other` after the current ones.
    pub fn extend(&mut self, other: &Headers) {
        self.entries.extend(other.entries.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_duplicates_in_order() {
        let headers = Headers::new()
            .with("x-tag", "a")
            .with("other", "b")
            .with("X-Tag", "c");

        let tags: Vec<_> = headers.get_all("x-tag").collect();
        assert_eq!(tags, vec!["a", "c"]);
        assert_eq!(headers.get("X-TAG"), Some("a"));
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn missing_key() {
        let headers = Headers::new();
        assert!(headers.get("authorization").is_none());
        assert!(headers.is_empty());
    }

    #[test]
    fn serializes_as_pair_list() {
        let headers: Headers = [("k", "v"), ("k", "w")].into_iter().collect();
        let json = serde_json::to_string(&headers).unwrap();
        assert_eq!(json, r#"[["k","v"],["k","w"]]"#);
        let parsed: Headers = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, headers);
    }

    #[test]
    fn extend_appends() {
        let mut base = Headers::new().with("a", "1");
        base.extend(&Headers::new().with("b", "2"));
        let keys: Vec<_> = base.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
