use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::Mutex;

/// One keyed table of the in-memory backend. Reads hand out clones so no
/// lock is held across an `.await` by callers.
#[derive(Debug)]
pub struct Table<K, V> {
    rows: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V: Clone> Table<K, V> {
    pub async fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.rows.lock().await.get(key).cloned()
    }

    /// Insert or overwrite, returning the previous row
    pub async fn insert(&self, key: K, value: V) -> Option<V> {
        self.rows.lock().await.insert(key, value)
    }

    pub async fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.rows.lock().await.remove(key)
    }

    /// Edit the row for `key` in place, starting from `V::default()` when absent.
    pub async fn edit<R>(&self, key: K, f: impl FnOnce(&mut V) -> R) -> R
    where
        V: Default,
    {
        f(self.rows.lock().await.entry(key).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_edit_starts_from_default_and_lookups_borrow() {
        let table: Table<String, Vec<u32>> = Table::default();

        let len = table
            .edit("a".to_string(), |rows| {
                rows.push(1);
                rows.len()
            })
            .await;
        assert_eq!(len, 1);
        table.edit("a".to_string(), |rows| rows.push(2)).await;

        assert_eq!(table.get("a").await, Some(vec![1, 2]));
        assert_eq!(table.insert("a".to_string(), vec![9]).await, Some(vec![1, 2]));
        assert_eq!(table.remove("a").await, Some(vec![9]));
        assert_eq!(table.get("a").await, None);
    }
}
