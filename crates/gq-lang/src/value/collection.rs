use std::fmt::Debug;

use crate::vm::error::RuntimeError;

use super::Value;

/// A keyed sequence of values produced by the engine or supplied by a host.
///
/// Iteration is single pass. A second traversal calls [`Collection::begin`]
/// again.
pub trait Collection: Debug + Send + Sync {
    fn begin(&self) -> Box<dyn CollectionIter + '_>;

    /// Number of entries when it is known without iterating.
    fn count(&self) -> Option<usize> {
        None
    }
}

/// A cursor over a [`Collection`]. It starts before the first entry, so
/// `next` must return `true` before `key` or `value` yield anything.
pub trait CollectionIter {
    fn next(&mut self) -> Result<bool, RuntimeError>;

    fn key(&self) -> Option<Value>;

    fn value(&self) -> Option<Value>;
}

/// Collects every entry of `collection` in iteration order.
pub fn entries(collection: &dyn Collection) -> Result<Vec<(Value, Value)>, RuntimeError> {
    let mut iter = collection.begin();
    let mut entries = Vec::with_capacity(collection.count().unwrap_or_default());
    while iter.next()? {
        if let (Some(key), Some(value)) = (iter.key(), iter.value()) {
            entries.push((key, value));
        }
    }
    Ok(entries)
}

/// Collects the values of `collection`, dropping its keys.
pub fn values(collection: &dyn Collection) -> Result<Vec<Value>, RuntimeError> {
    let mut iter = collection.begin();
    let mut values = Vec::with_capacity(collection.count().unwrap_or_default());
    while iter.next()? {
        values.extend(iter.value());
    }
    Ok(values)
}

/// Parallel key and value vectors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrayCollection {
    keys: Vec<Value>,
    values: Vec<Value>,
}

impl ArrayCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let (keys, values) = pairs.into_iter().unzip();
        ArrayCollection { keys, values }
    }

    /// Keys the values by their position, starting at 0.
    pub fn from_values(values: Vec<Value>) -> Self {
        let keys = (0..values.len() as i64).map(Value::Int).collect();
        ArrayCollection { keys, values }
    }

    pub fn push(&mut self, key: Value, value: Value) {
        self.keys.push(key);
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> &[Value] {
        &self.keys
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl Collection for ArrayCollection {
    fn begin(&self) -> Box<dyn CollectionIter + '_> {
        Box::new(ArrayIter {
            collection: self,
            position: None,
        })
    }

    fn count(&self) -> Option<usize> {
        Some(self.len())
    }
}

struct ArrayIter<'a> {
    collection: &'a ArrayCollection,
    position: Option<usize>,
}

impl CollectionIter for ArrayIter<'_> {
    fn next(&mut self) -> Result<bool, RuntimeError> {
        let next = self.position.map_or(0, |i| i + 1);
        if next < self.collection.len() {
            self.position = Some(next);
            Ok(true)
        } else {
            self.position = Some(self.collection.len());
            Ok(false)
        }
    }

    fn key(&self) -> Option<Value> {
        self.position.and_then(|i| self.collection.keys.get(i)).cloned()
    }

    fn value(&self) -> Option<Value> {
        self.position.and_then(|i| self.collection.values.get(i)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[derive(Debug)]
    struct Countdown(i64);

    struct CountdownIter(i64);

    impl Collection for Countdown {
        fn begin(&self) -> Box<dyn CollectionIter + '_> {
            Box::new(CountdownIter(self.0 + 1))
        }
    }

    impl CollectionIter for CountdownIter {
        fn next(&mut self) -> Result<bool, RuntimeError> {
            self.0 -= 1;
            Ok(self.0 > 0)
        }

        fn key(&self) -> Option<Value> {
            (self.0 > 0).then_some(Value::Int(self.0))
        }

        fn value(&self) -> Option<Value> {
            (self.0 > 0).then(|| Value::String(format!("t-{}", self.0)))
        }
    }

    #[test]
    fn test_iterator_starts_before_first_entry() {
        let collection = ArrayCollection::from_values(vec![Value::Bool(true)]);
        let mut iter = collection.begin();
        assert_eq!(iter.key(), None);
        assert!(iter.next().unwrap());
        assert_eq!(iter.key(), Some(Value::Int(0)));
        assert_eq!(iter.value(), Some(Value::Bool(true)));
        assert!(!iter.next().unwrap());
        assert!(!iter.next().unwrap());
    }

    #[test]
    fn test_traversal_restarts_with_begin() {
        let collection = ArrayCollection::from_values(vec![Value::Int(7), Value::Int(8)]);
        assert_eq!(values(&collection).unwrap(), values(&collection).unwrap());
    }

    #[rstest]
    #[case(ArrayCollection::new(), Some(0))]
    #[case(ArrayCollection::from_values(vec![Value::Int(1), Value::Int(2)]), Some(2))]
    fn test_count_hint(#[case] collection: ArrayCollection, #[case] expected: Option<usize>) {
        assert_eq!(collection.count(), expected);
    }

    #[test]
    fn test_host_collection_without_count_hint() {
        let collection = Countdown(3);
        assert_eq!(collection.count(), None);
        assert_eq!(
            entries(&collection).unwrap(),
            vec![
                (Value::Int(3), Value::String("t-3".to_string())),
                (Value::Int(2), Value::String("t-2".to_string())),
                (Value::Int(1), Value::String("t-1".to_string())),
            ]
        );
    }
}
