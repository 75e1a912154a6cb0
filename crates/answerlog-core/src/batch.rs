use std::collections::HashSet;

/// Deduplicated set of names observed while answering one request.
///
/// Iteration order is unspecified; the writer imposes its own ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    names: HashSet<String>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn into_names(self) -> impl Iterator<Item = String> {
        self.names.into_iter()
    }
}

impl From<HashSet<String>> for Batch {
    fn from(names: HashSet<String>) -> Self {
        Self { names }
    }
}

impl<S: Into<String>> FromIterator<S> for Batch {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}
