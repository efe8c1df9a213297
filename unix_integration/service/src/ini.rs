//! Minimal INI handling for smb.conf and sssd.conf.
//!
//! Files are edited in place: comments, blank lines and the order of sections and keys
//! are preserved. Edits are described as an [`IniChanges`] list and applied to a copy of
//! the parsed file, so a failing change leaves both the in-memory config and the file
//! untouched. The file is then replaced in one rename.

use std::fmt;
use std::fs::Permissions;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use realmd_common::error::RealmError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// Comments, blank lines and anything we don't understand, kept verbatim.
    Other(String),
    Pair { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    /// `None` for lines that appear before the first header.
    name: Option<String>,
    lines: Vec<Line>,
}

impl Section {
    fn find(&self, key: &str) -> Option<usize> {
        self.lines.iter().position(|l| match l {
            Line::Pair { key: k, .. } => keys_equal(k, key),
            Line::Other(_) => false,
        })
    }
}

// smb.conf keys are case insensitive and "winbind  enum users" is the same key as
// "winbind enum users".
fn keys_equal(a: &str, b: &str) -> bool {
    let a = a.split_whitespace();
    let b = b.split_whitespace();
    a.map(str::to_lowercase).eq(b.map(str::to_lowercase))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IniChange {
    Set {
        section: String,
        key: String,
        value: String,
    },
    Remove {
        section: String,
        key: String,
    },
    RemoveSection {
        section: String,
    },
    /// Add and remove items of a delimited list value. The key is removed when the list
    /// ends up empty, unless a placeholder is given.
    ChangeList {
        section: String,
        key: String,
        delimiter: char,
        add: Vec<String>,
        remove: Vec<String>,
        placeholder: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniChanges {
    changes: Vec<IniChange>,
}

impl IniChanges {
    pub fn new() -> Self {
        IniChanges::default()
    }

    pub fn set<S: Into<String>>(mut self, section: &str, key: &str, value: S) -> Self {
        self.changes.push(IniChange::Set {
            section: section.to_string(),
            key: key.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn remove(mut self, section: &str, key: &str) -> Self {
        self.changes.push(IniChange::Remove {
            section: section.to_string(),
            key: key.to_string(),
        });
        self
    }

    pub fn remove_section(mut self, section: &str) -> Self {
        self.changes.push(IniChange::RemoveSection {
            section: section.to_string(),
        });
        self
    }

    pub fn change_list(
        mut self,
        section: &str,
        key: &str,
        delimiter: char,
        add: &[String],
        remove: &[String],
        placeholder: Option<&str>,
    ) -> Self {
        self.changes.push(IniChange::ChangeList {
            section: section.to_string(),
            key: key.to_string(),
            delimiter,
            add: add.to_vec(),
            remove: remove.to_vec(),
            placeholder: placeholder.map(str::to_string),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// Split a delimited list, trimming whitespace and dropping empty items.
pub fn split_list(value: &str, delimiter: char) -> Vec<String> {
    value
        .split(delimiter)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniConfig {
    sections: Vec<Section>,
}

impl IniConfig {
    pub fn parse(text: &str) -> Self {
        let mut sections = vec![Section {
            name: None,
            lines: Vec::new(),
        }];

        for raw in text.lines() {
            let trimmed = raw.trim();
            if trimmed.starts_with('[') && trimmed.ends_with(']') && trimmed.len() >= 2 {
                sections.push(Section {
                    name: Some(trimmed[1..trimmed.len() - 1].trim().to_string()),
                    lines: Vec::new(),
                });
                continue;
            }
            let line = if trimmed.starts_with('#') || trimmed.starts_with(';') {
                Line::Other(raw.to_string())
            } else if let Some((key, value)) = raw.split_once('=') {
                Line::Pair {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                }
            } else {
                Line::Other(raw.to_string())
            };
            if let Some(section) = sections.last_mut() {
                section.lines.push(line);
            }
        }

        IniConfig { sections }
    }

    /// Read a file, a missing file is an empty config.
    pub fn read(path: &Path) -> Result<Self, RealmError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(IniConfig::parse(&text)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file not present");
                Ok(IniConfig::default())
            }
            Err(e) => {
                error!(?e, path = %path.display(), "unable to read config file");
                Err(RealmError::Internal(format!(
                    "Couldn't read config file: {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }

    fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections
            .iter_mut()
            .find(|s| s.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        let s = self.section(section)?;
        s.find(key).and_then(|i| match &s.lines[i] {
            Line::Pair { value, .. } => Some(value.as_str()),
            Line::Other(_) => None,
        })
    }

    pub fn get_list(&self, section: &str, key: &str, delimiter: char) -> Vec<String> {
        self.get(section, key)
            .map(|v| split_list(v, delimiter))
            .unwrap_or_default()
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().filter_map(|s| s.name.as_deref())
    }

    fn set(&mut self, section: &str, key: &str, value: &str) {
        let line = Line::Pair {
            key: key.to_string(),
            value: value.to_string(),
        };
        match self.section_mut(section) {
            Some(s) => match s.find(key) {
                Some(i) => s.lines[i] = line,
                None => {
                    // Keep new keys ahead of any trailing blank lines.
                    let at = s
                        .lines
                        .iter()
                        .rposition(|l| !matches!(l, Line::Other(o) if o.trim().is_empty()))
                        .map(|i| i + 1)
                        .unwrap_or(0);
                    s.lines.insert(at, line);
                }
            },
            None => {
                if let Some(last) = self.sections.last_mut() {
                    let ends_blank = last
                        .lines
                        .last()
                        .map_or(true, |l| matches!(l, Line::Other(o) if o.trim().is_empty()));
                    if !ends_blank || (last.name.is_some() && last.lines.is_empty()) {
                        last.lines.push(Line::Other(String::new()));
                    }
                }
                self.sections.push(Section {
                    name: Some(section.to_string()),
                    lines: vec![line],
                });
            }
        }
    }

    fn remove(&mut self, section: &str, key: &str) {
        if let Some(s) = self.section_mut(section) {
            s.lines.retain(|l| match l {
                Line::Pair { key: k, .. } => !keys_equal(k, key),
                Line::Other(_) => true,
            });
        }
    }

    fn remove_section(&mut self, name: &str) {
        self.sections
            .retain(|s| !s.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)));
    }

    fn apply_one(&mut self, change: &IniChange) -> Result<(), RealmError> {
        match change {
            IniChange::Set {
                section,
                key,
                value,
            } => {
                check_name(section, key)?;
                if value.contains('\n') {
                    return Err(RealmError::Internal(format!(
                        "Invalid value for config key: {}",
                        key
                    )));
                }
                self.set(section, key, value);
            }
            IniChange::Remove { section, key } => {
                check_name(section, key)?;
                self.remove(section, key);
            }
            IniChange::RemoveSection { section } => {
                check_name(section, "-")?;
                self.remove_section(section);
            }
            IniChange::ChangeList {
                section,
                key,
                delimiter,
                add,
                remove,
                placeholder,
            } => {
                check_name(section, key)?;
                let mut items = self.get_list(section, key, *delimiter);
                if let Some(p) = placeholder {
                    let p = p.trim_matches(*delimiter).trim();
                    items.retain(|i| i != p);
                }
                items.retain(|i| !remove.iter().any(|r| r.eq_ignore_ascii_case(i)));
                for a in add {
                    if !items.iter().any(|i| i.eq_ignore_ascii_case(a)) {
                        items.push(a.clone());
                    }
                }
                if items.is_empty() {
                    match placeholder {
                        Some(p) => self.set(section, key, p),
                        None => self.remove(section, key),
                    }
                } else {
                    let joined = items.join(&format!("{} ", delimiter));
                    self.set(section, key, &joined);
                }
            }
        }
        Ok(())
    }

    /// Apply every change to a copy of this config. On any failure the error is returned
    /// and nothing has been changed.
    pub fn with_changes(&self, changes: &IniChanges) -> Result<IniConfig, RealmError> {
        let mut staged = self.clone();
        for change in changes.changes.iter() {
            staged.apply_one(change)?;
        }
        Ok(staged)
    }

    /// Atomically replace the file at `path` with this config. The previous file mode is
    /// kept, new files are only readable by root.
    pub fn write(&self, path: &Path) -> Result<(), RealmError> {
        let dir = match path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mode = std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o7777)
            .unwrap_or(0o600);

        let write_err = |e: std::io::Error| {
            error!(?e, path = %path.display(), "unable to write config file");
            RealmError::Internal(format!(
                "Couldn't write out config file: {}: {}",
                path.display(),
                e
            ))
        };

        std::fs::create_dir_all(&dir).map_err(write_err)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".realmd-")
            .permissions(Permissions::from_mode(mode))
            .tempfile_in(&dir)
            .map_err(write_err)?;
        tmp.write_all(self.to_string().as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;
        debug!(path = %path.display(), "wrote config file");
        Ok(())
    }
}

fn check_name(section: &str, key: &str) -> Result<(), RealmError> {
    let bad = |s: &str| s.trim().is_empty() || s.contains(['\n', '[', ']', '=']);
    if bad(section) || bad(key) {
        return Err(RealmError::Internal(format!(
            "Invalid config section or key: [{}] {}",
            section, key
        )));
    }
    Ok(())
}

impl fmt::Display for IniConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for section in self.sections.iter() {
            if let Some(name) = &section.name {
                writeln!(f, "[{}]", name)?;
            }
            for line in section.lines.iter() {
                match line {
                    Line::Other(raw) => writeln!(f, "{}", raw)?,
                    Line::Pair { key, value } => writeln!(f, "{} = {}", key, value)?,
                }
            }
        }
        Ok(())
    }
}

/// Read `path`, apply all of `changes` and write the result back in one go.
pub fn change_file(path: &Path, changes: &IniChanges) -> Result<IniConfig, RealmError> {
    let current = IniConfig::read(path)?;
    let staged = current.with_changes(changes)?;
    if staged != current {
        staged.write(path)?;
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMB_CONF: &str = "# Samba config\n\
[global]\n\
    workgroup = SAMBA\n\
    ; old setting\n\
    security = user\n\
\n\
[homes]\n\
    browseable = No\n";

    #[test]
    fn test_parse_and_get() {
        let cfg = IniConfig::parse(SMB_CONF);
        assert_eq!(cfg.get("global", "workgroup"), Some("SAMBA"));
        assert_eq!(cfg.get("GLOBAL", "Security"), Some("user"));
        assert_eq!(cfg.get("homes", "browseable"), Some("No"));
        assert_eq!(cfg.get("global", "realm"), None);
        assert_eq!(cfg.sections().collect::<Vec<_>>(), vec!["global", "homes"]);
    }

    #[test]
    fn test_changes_preserve_comments() {
        let cfg = IniConfig::parse(SMB_CONF);
        let changes = IniChanges::new()
            .set("global", "security", "ads")
            .set("global", "realm", "EXAMPLE.COM")
            .set("sssd", "domains", "example.com");
        let out = cfg.with_changes(&changes).expect("changes apply").to_string();
        assert!(out.starts_with("# Samba config\n[global]\n"));
        assert!(out.contains("; old setting"));
        assert!(out.contains("security = ads"));
        assert!(out.contains("realm = EXAMPLE.COM\n\n[homes]"));
        assert!(out.ends_with("[sssd]\ndomains = example.com\n"));
    }

    #[test]
    fn test_invalid_change_applies_nothing() {
        let cfg = IniConfig::parse(SMB_CONF);
        let changes = IniChanges::new()
            .set("global", "security", "ads")
            .set("global", "bad=key", "x");
        assert!(cfg.with_changes(&changes).is_err());
        assert_eq!(cfg.get("global", "security"), Some("user"));
    }

    #[test]
    fn test_change_list_with_placeholder() {
        let cfg = IniConfig::parse("[domain/example.com]\nsimple_allow_users = ,\n");
        let added = cfg
            .with_changes(&IniChanges::new().change_list(
                "domain/example.com",
                "simple_allow_users",
                ',',
                &["alice@example.com".to_string(), "bob@example.com".to_string()],
                &[],
                Some(","),
            ))
            .expect("change applies");
        assert_eq!(
            added.get("domain/example.com", "simple_allow_users"),
            Some("alice@example.com, bob@example.com")
        );

        let removed = added
            .with_changes(&IniChanges::new().change_list(
                "domain/example.com",
                "simple_allow_users",
                ',',
                &[],
                &["ALICE@example.com".to_string(), "bob@example.com".to_string()],
                Some(","),
            ))
            .expect("change applies");
        assert_eq!(removed.get("domain/example.com", "simple_allow_users"), Some(","));
        assert!(removed
            .get_list("domain/example.com", "simple_allow_users", ',')
            .is_empty());
    }

    #[test]
    fn test_change_file_is_atomic_and_keeps_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sssd.conf");
        change_file(
            &path,
            &IniChanges::new()
                .set("sssd", "domains", "example.com")
                .set("domain/example.com", "id_provider", "ad"),
        )
        .expect("write config");
        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let cfg = change_file(&path, &IniChanges::new().remove_section("domain/example.com"))
            .expect("write config");
        assert!(!cfg.has_section("domain/example.com"));
        let on_disk = IniConfig::read(&path).expect("read config");
        assert_eq!(on_disk, cfg);
        // Only the config itself remains, no temp files.
        assert_eq!(std::fs::read_dir(dir.path()).expect("read_dir").count(), 1);
    }
}
