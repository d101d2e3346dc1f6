use std::collections::BTreeSet;

/// Unordered set that records pending additions and removals so a mutation
/// can send deltas instead of the full membership.
///
/// Construction from values, or `clear`, marks the set as a replacement:
/// the next mutation writes the complete membership. A default set is
/// untouched and is omitted from mutations.
#[derive(Debug, Clone)]
pub struct DeltaSet<T: Ord + Clone> {
    values: BTreeSet<T>,
    added: BTreeSet<T>,
    removed: BTreeSet<T>,
    replace: bool,
}

pub type StringSet = DeltaSet<String>;
pub type IntSet = DeltaSet<i64>;

impl<T: Ord + Clone> Default for DeltaSet<T> {
    fn default() -> Self {
        Self {
            values: BTreeSet::new(),
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
            replace: false,
        }
    }
}

impl<T: Ord + Clone> DeltaSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values<I: IntoIterator<Item = T>>(values: I) -> Self {
        Self {
            values: values.into_iter().collect(),
            replace: true,
            ..Self::default()
        }
    }

    pub fn add(&mut self, value: T) {
        self.values.insert(value.clone());
        if !self.replace {
            self.removed.remove(&value);
            self.added.insert(value);
        }
    }

    pub fn remove(&mut self, value: &T) {
        self.values.remove(value);
        if !self.replace {
            self.added.remove(value);
            self.removed.insert(value.clone());
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.added.clear();
        self.removed.clear();
        self.replace = true;
    }

    pub fn contains(&self, value: &T) -> bool {
        self.values.contains(value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.values.iter()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.values.iter().cloned().collect()
    }

    /// Members of this set that are not in `others`.
    pub fn diff(&self, others: &[T]) -> Vec<T> {
        self.values
            .iter()
            .filter(|v| !others.contains(v))
            .cloned()
            .collect()
    }

    pub fn is_replacement(&self) -> bool {
        self.replace
    }

    pub fn has_delta(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    pub fn pending_added(&self) -> Vec<T> {
        self.added.iter().cloned().collect()
    }

    pub fn pending_removed(&self) -> Vec<T> {
        self.removed.iter().cloned().collect()
    }

    pub(crate) fn load<I: IntoIterator<Item = T>>(&mut self, values: I) {
        self.values = values.into_iter().collect();
        self.mark_clean();
    }

    pub fn mark_clean(&mut self) {
        self.added.clear();
        self.removed.clear();
        self.replace = false;
    }
}

impl<T: Ord + Clone> PartialEq for DeltaSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl<T: Ord + Clone> Eq for DeltaSet<T> {}

impl<T: Ord + Clone> FromIterator<T> for DeltaSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_values(iter)
    }
}

impl StringSet {
    pub fn of(values: &[&str]) -> Self {
        Self::from_values(values.iter().map(|v| v.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unordered_equality() {
        let a = IntSet::from_values([4, 3, 2, 1]);
        let b = IntSet::from_values([1, 2, 3, 4]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_diff() {
        let set = IntSet::from_values([1, 2, 3, 4, 7]);
        assert_eq!(set.diff(&[1, 2, 3, 4]), vec![7]);
        assert!(set.diff(&[1, 2, 3, 4, 7]).is_empty());
    }

    #[test]
    fn test_deltas_after_clean() {
        let mut set = IntSet::from_values([1, 2, 3, 4]);
        set.mark_clean();

        set.add(7);
        set.add(7);
        assert_eq!(set.pending_added(), vec![7]);

        set.remove(&2);
        assert_eq!(set.pending_removed(), vec![2]);
        assert_eq!(set.to_vec(), vec![1, 3, 4, 7]);

        set.add(2);
        assert!(set.pending_removed().is_empty());
    }

    #[test]
    fn test_untouched_vs_cleared() {
        let untouched = StringSet::new();
        assert!(!untouched.is_replacement());
        assert!(!untouched.has_delta());

        let mut cleared = StringSet::of(&["a"]);
        cleared.mark_clean();
        cleared.clear();
        assert!(cleared.is_replacement());
        assert!(cleared.is_empty());
    }
}
