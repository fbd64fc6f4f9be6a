/// Ordered, owned sequence of query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<T> {
    items: Vec<T>,
}

impl<T> Collection<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn create(items: impl IntoIterator<Item = T>) -> Self {
        items.into_iter().collect()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Collection<U> {
        self.items.into_iter().map(f).collect()
    }

    pub fn filter(self, mut f: impl FnMut(&T) -> bool) -> Self {
        self.items.into_iter().filter(|item| f(item)).collect()
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn into_first(self) -> Option<T> {
        self.items.into_iter().next()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T: Clone> Collection<T> {
    pub fn to_array(&self) -> Vec<T> {
        self.items.clone()
    }
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> FromIterator<T> for Collection<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for Collection<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Collection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_filter_first() {
        let numbers = Collection::create(1..=5);
        let evens = numbers.map(|n| n * 10).filter(|n| n % 20 == 0);
        assert_eq!(evens.count(), 2);
        assert_eq!(evens.first(), Some(&20));
        assert_eq!(evens.last(), Some(&40));
        assert_eq!(evens.to_array(), vec![20, 40]);
    }

    #[test]
    fn test_empty_collection() {
        let empty: Collection<i32> = Collection::default();
        assert!(empty.is_empty());
        assert_eq!(empty.first(), None);
        assert_eq!(empty.into_first(), None);
    }
}
