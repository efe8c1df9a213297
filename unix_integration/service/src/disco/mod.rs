//! What discovery learnt about a domain.

pub mod cache;
pub mod dns;
pub mod probe;

pub const KEY_DOMAIN: &str = "domain";
pub const KEY_REALM: &str = "realm";
pub const KEY_KDCS: &str = "kdcs";
pub const KEY_TYPE: &str = "type";
pub const KEY_SERVER_SOFTWARE: &str = "server-software";
pub const KEY_CLIENT_SOFTWARE: &str = "client-software";
pub const KEY_MEMBERSHIP_SOFTWARE: &str = "membership-software";
pub const KEY_WORKGROUP: &str = "workgroup";

pub const TYPE_KERBEROS: &str = "kerberos";
pub const TYPE_KERBEROS_AD: &str = "kerberos-ad";
pub const TYPE_KERBEROS_IPA: &str = "kerberos-ipa";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoValue {
    Str(String),
    List(Vec<String>),
}

/// An ordered bag of discovered facts. Filled in while a probe runs, then cloned out to
/// whoever needs it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disco {
    entries: Vec<(String, DiscoValue)>,
}

impl Disco {
    pub fn new(domain: &str) -> Self {
        let mut disco = Disco::default();
        disco.set(KEY_DOMAIN, domain);
        disco
    }

    pub fn set<S: Into<String>>(&mut self, key: &str, value: S) {
        self.insert(key, DiscoValue::Str(value.into()));
    }

    pub fn set_list(&mut self, key: &str, value: Vec<String>) {
        self.insert(key, DiscoValue::List(value));
    }

    fn insert(&mut self, key: &str, value: DiscoValue) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find_map(|(k, v)| match v {
            DiscoValue::Str(s) if k == key => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn get_list(&self, key: &str) -> &[String] {
        self.entries
            .iter()
            .find_map(|(k, v)| match v {
                DiscoValue::List(l) if k == key => Some(l.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn domain(&self) -> Option<&str> {
        self.get(KEY_DOMAIN)
    }

    pub fn realm(&self) -> Option<&str> {
        self.get(KEY_REALM)
    }

    pub fn kdcs(&self) -> &[String] {
        self.get_list(KEY_KDCS)
    }

    pub fn disco_type(&self) -> Option<&str> {
        self.get(KEY_TYPE)
    }

    pub fn server_software(&self) -> Option<&str> {
        self.get(KEY_SERVER_SOFTWARE)
    }

    /// The first KDC host, without its port.
    pub fn first_kdc_host(&self) -> Option<&str> {
        self.kdcs()
            .first()
            .map(|kdc| kdc.rsplit_once(':').map(|(h, _)| h).unwrap_or(kdc))
    }

    /// Samba needs a NetBIOS workgroup name, fall back to the first DNS label when
    /// discovery couldn't tell us.
    pub fn workgroup(&self) -> Option<String> {
        self.get(KEY_WORKGROUP).map(str::to_string).or_else(|| {
            self.domain()
                .and_then(|d| d.split('.').next())
                .filter(|l| !l.is_empty())
                .map(|l| l.to_uppercase())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disco_keeps_insert_order() {
        let mut disco = Disco::new("example.com");
        disco.set(KEY_REALM, "EXAMPLE.COM");
        disco.set_list(KEY_KDCS, vec!["dc1.example.com:88".to_string()]);
        disco.set(KEY_REALM, "OTHER.COM");
        assert_eq!(
            disco.keys().collect::<Vec<_>>(),
            vec![KEY_DOMAIN, KEY_REALM, KEY_KDCS]
        );
        assert_eq!(disco.realm(), Some("OTHER.COM"));
        assert_eq!(disco.first_kdc_host(), Some("dc1.example.com"));
        // A list is never returned as a string.
        assert_eq!(disco.get(KEY_KDCS), None);
    }

    #[test]
    fn test_workgroup_fallback() {
        let mut disco = Disco::new("ad.example.com");
        assert_eq!(disco.workgroup().as_deref(), Some("AD"));
        disco.set(KEY_WORKGROUP, "CORP");
        assert_eq!(disco.workgroup().as_deref(), Some("CORP"));
    }
}
