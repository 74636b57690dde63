//! `.netrc` credential lookup: `HOME` + `/.netrc` is loaded when
//! `netrc` is on. Minimal reader for the subset every `netrc`
//! implementation agrees on: whitespace-separated `machine`/`login`/
//! `password` tokens, one or more `machine` stanzas, `default` as a
//! catch-all.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

#[derive(Default)]
struct Entry {
    machine: Option<String>,
    login: Option<String>,
    password: Option<String>,
}

impl Entry {
    fn into_credentials(self) -> Option<Credentials> {
        Some(Credentials { login: self.login?, password: self.password? })
    }
}

/// Look up credentials for `host` in `$HOME/.netrc`. Returns `None` if
/// the file is missing, unreadable, or has no matching (or `default`)
/// stanza.
pub fn lookup(host: &str) -> Option<Credentials> {
    let path = netrc_path()?;
    let contents = std::fs::read_to_string(path).ok()?;
    find_entry(&contents, host)
}

fn netrc_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".netrc"))
}

fn find_entry(contents: &str, host: &str) -> Option<Credentials> {
    let tokens: Vec<&str> = contents.split_whitespace().collect();
    let mut entries: Vec<Entry> = Vec::new();
    let mut current: Option<Entry> = None;
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "machine" => {
                if let Some(e) = current.take() {
                    entries.push(e);
                }
                let mut e = Entry::default();
                i += 1;
                if i < tokens.len() {
                    e.machine = Some(tokens[i].to_string());
                }
                current = Some(e);
            }
            "default" => {
                if let Some(e) = current.take() {
                    entries.push(e);
                }
                current = Some(Entry { machine: None, login: None, password: None });
            }
            "login" => {
                i += 1;
                if let (Some(e), Some(v)) = (current.as_mut(), tokens.get(i)) {
                    e.login = Some(v.to_string());
                }
            }
            "password" => {
                i += 1;
                if let (Some(e), Some(v)) = (current.as_mut(), tokens.get(i)) {
                    e.password = Some(v.to_string());
                }
            }
            _ => {}
        }
        i += 1;
    }
    if let Some(e) = current.take() {
        entries.push(e);
    }

    entries
        .iter()
        .position(|e| e.machine.as_deref() == Some(host))
        .or_else(|| entries.iter().position(|e| e.machine.is_none()))
        .and_then(|idx| entries.swap_remove(idx).into_credentials())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_named_machine_over_default() {
        let body = "default login anon password anon@\nmachine example.com login alice password s3cret\n";
        let creds = find_entry(body, "example.com").unwrap();
        assert_eq!(creds.login, "alice");
        assert_eq!(creds.password, "s3cret");
    }

    #[test]
    fn falls_back_to_default_stanza() {
        let body = "machine other.com login bob password x\ndefault login anon password anon@\n";
        let creds = find_entry(body, "example.com").unwrap();
        assert_eq!(creds.login, "anon");
    }

    #[test]
    fn no_match_and_no_default_returns_none() {
        let body = "machine other.com login bob password x\n";
        assert!(find_entry(body, "example.com").is_none());
    }
}
