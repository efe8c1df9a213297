use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::Disco;

/// Short lived memory of recent probe outcomes, so that several providers asking about
/// the same name in one discovery only hit DNS once. Negative answers are cached too,
/// errors are not.
pub struct DiscoCache {
    lifetime: Duration,
    entries: Mutex<HashMap<(String, &'static str), (Instant, Option<Disco>)>>,
}

impl DiscoCache {
    pub fn new(lifetime: Duration) -> Self {
        DiscoCache {
            lifetime,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// `None` on a miss, `Some(None)` for a cached negative.
    pub async fn get(&self, domain: &str, flavor: &'static str) -> Option<Option<Disco>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, (at, _)| now.duration_since(*at) < self.lifetime);
        entries
            .get(&(domain.to_string(), flavor))
            .map(|(_, disco)| disco.clone())
    }

    pub async fn insert(&self, domain: &str, flavor: &'static str, disco: Option<Disco>) {
        self.entries
            .lock()
            .await
            .insert((domain.to_string(), flavor), (Instant::now(), disco));
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = DiscoCache::new(Duration::from_secs(5));
        cache.insert("example.com", "ad", None).await;
        cache
            .insert("example.com", "kerberos", Some(Disco::new("example.com")))
            .await;

        assert_eq!(cache.get("example.com", "ad").await, Some(None));
        assert!(matches!(
            cache.get("example.com", "kerberos").await,
            Some(Some(_))
        ));
        assert_eq!(cache.get("example.org", "ad").await, None);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("example.com", "ad").await, None);
    }
}
