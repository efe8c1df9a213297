use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use realmd_common::proto::RealmKind;
use tokio::sync::Mutex;

use crate::disco::Disco;
use crate::realm::Realm;

// Shared by all registries so every realm path in the process is unique.
static REALM_COUNTER: AtomicU32 = AtomicU32::new(0);

fn escape_path_component(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Realms known to one provider, at most one per (kind, name).
pub struct RealmRegistry {
    provider_path: String,
    realms: Mutex<HashMap<(RealmKind, String), Arc<Realm>>>,
}

impl RealmRegistry {
    pub fn new(provider_path: &str) -> Self {
        RealmRegistry {
            provider_path: provider_path.to_string(),
            realms: Mutex::new(HashMap::new()),
        }
    }

    /// Return the realm for `(kind, name)`, creating it the first time it is seen. A
    /// supplied discovery result replaces the one stored on an existing realm.
    pub async fn lookup_or_register(
        &self,
        kind: RealmKind,
        name: &str,
        disco: Option<Disco>,
    ) -> Arc<Realm> {
        let key = (kind, name.to_lowercase());
        let mut realms = self.realms.lock().await;
        if let Some(realm) = realms.get(&key) {
            let realm = Arc::clone(realm);
            drop(realms);
            if let Some(disco) = disco {
                realm.set_disco(disco).await;
            }
            return realm;
        }

        let n = REALM_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = format!(
            "{}/{}_{}",
            self.provider_path,
            escape_path_component(name),
            n
        );
        debug!(%kind, %name, %path, "registering realm");
        let realm = Arc::new(Realm::new(kind, name, path, disco));
        realms.insert(key, Arc::clone(&realm));
        realm
    }

    pub async fn lookup(&self, kind: RealmKind, name: &str) -> Option<Arc<Realm>> {
        self.realms
            .lock()
            .await
            .get(&(kind, name.to_lowercase()))
            .cloned()
    }

    /// All realms, in registration order.
    pub async fn realms(&self) -> Vec<Arc<Realm>> {
        let mut realms: Vec<Arc<Realm>> = self.realms.lock().await.values().cloned().collect();
        realms.sort_by_key(|r| {
            r.path()
                .rsplit_once('_')
                .and_then(|(_, n)| n.parse::<u32>().ok())
                .unwrap_or(u32::MAX)
        });
        realms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_or_register_is_idempotent() {
        let registry = RealmRegistry::new("/org/freedesktop/realmd/Sssd");
        let a = registry
            .lookup_or_register(RealmKind::SssdAd, "example.com", None)
            .await;
        let b = registry
            .lookup_or_register(
                RealmKind::SssdAd,
                "EXAMPLE.COM",
                Some(Disco::new("example.com")),
            )
            .await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.disco().await, Some(Disco::new("example.com")));

        let ipa = registry
            .lookup_or_register(RealmKind::SssdIpa, "example.com", None)
            .await;
        assert!(!Arc::ptr_eq(&a, &ipa));
        assert_ne!(a.path(), ipa.path());
        assert!(a.path().starts_with("/org/freedesktop/realmd/Sssd/example_com_"));

        let all = registry.realms().await;
        assert_eq!(all.len(), 2);
        assert!(Arc::ptr_eq(&all[0], &a));
    }
}
