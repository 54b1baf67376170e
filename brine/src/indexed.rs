//! Strongly-typed indexes and an interning index map
use std::collections::HashMap;

/// Stores a set of `(V, I)` tuples, with lookup in both directions.
///
/// Insertion deduplicates: inserting a value that is already present returns
/// the existing index, so an `I` handle is an identity for its value.
#[derive(Clone, Debug)]
pub struct IndexMap<V, I> {
    data: Vec<V>,
    map: HashMap<V, I>,
}

impl<V, I> Default for IndexMap<V, I> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            map: HashMap::new(),
        }
    }
}

impl<V, I> IndexMap<V, I>
where
    V: Eq + std::hash::Hash + Clone,
    I: Eq + Copy + From<usize>,
    usize: From<I>,
{
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Insert the given value, returning a (possibly pre-existing) handle
    pub fn insert(&mut self, v: V) -> I {
        *self.map.entry(v.clone()).or_insert_with(|| {
            let out = I::from(self.data.len());
            self.data.push(v);
            out
        })
    }

    /// Look up the handle for a value that may or may not be interned yet
    pub fn get(&self, v: &V) -> Option<I> {
        self.map.get(v).copied()
    }
}

impl<V, I> std::ops::Index<I> for IndexMap<V, I>
where
    usize: From<I>,
{
    type Output = V;
    fn index(&self, i: I) -> &V {
        &self.data[usize::from(i)]
    }
}

/// Defines an index type implemented as a `usize` newtype
macro_rules! define_index {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(usize);
        impl From<usize> for $name {
            fn from(v: usize) -> Self {
                Self(v)
            }
        }
        impl From<$name> for usize {
            fn from(v: $name) -> Self {
                v.0
            }
        }
        impl $name {
            #[allow(dead_code)]
            pub fn index(&self) -> usize {
                self.0
            }
        }
    };
}
pub(crate) use define_index;

#[cfg(test)]
mod test {
    use super::*;

    define_index!(Handle, "Test handle");

    #[test]
    fn test_insert_dedup() {
        let mut m: IndexMap<&str, Handle> = IndexMap::default();
        let a = m.insert("hello");
        let b = m.insert("world");
        let c = m.insert("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(m.len(), 2);
        assert_eq!(m[a], "hello");
        assert_eq!(m.get(&"world"), Some(b));
        assert_eq!(m.get(&"nope"), None);
    }
}
