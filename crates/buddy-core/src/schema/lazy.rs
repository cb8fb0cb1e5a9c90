use std::future::Future;

/// A nested entity that is either loaded or only known by its key.
///
/// Parent resolvers hand children the key they need (a bundle url, a pull
/// request number) instead of a half-filled record; the child loads the
/// entity only when the client actually selects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lazy<K, T> {
    Pending(K),
    Resolved(T),
}

impl<K: Clone, T: Clone> Lazy<K, T> {
    pub fn key(&self) -> Option<&K> {
        match self {
            Lazy::Pending(key) => Some(key),
            Lazy::Resolved(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Lazy::Resolved(_))
    }

    /// The loaded value, calling `load` with the key if still pending.
    pub async fn load<F, Fut, E>(&self, load: F) -> Result<T, E>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self {
            Lazy::Resolved(value) => Ok(value.clone()),
            Lazy::Pending(key) => load(key.clone()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_calls_loader_with_key() {
        let lazy: Lazy<u64, Vec<u64>> = Lazy::Pending(3);
        assert_eq!(lazy.key(), Some(&3));
        let loaded = lazy.load(|n| async move { Ok::<_, ()>(vec![n; 2]) }).await;
        assert_eq!(loaded.unwrap(), vec![3, 3]);
    }

    #[tokio::test]
    async fn resolved_skips_loader() {
        let lazy: Lazy<u64, &str> = Lazy::Resolved("ready");
        assert!(lazy.is_resolved());
        let loaded = lazy.load(|_| async { Err::<&str, ()>(()) }).await;
        assert_eq!(loaded.unwrap(), "ready");
    }
}
