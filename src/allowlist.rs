//! Known-benign domains that skip scanning entirely.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use url::{Host, Url};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "AllowList";

use crate::log_info;

/// Public suffixes with two labels, under which the registrable domain keeps
/// three labels (`bbc.co.uk`, not `co.uk`).
const TWO_LEVEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "com.au", "net.au", "org.au", "co.nz", "co.jp",
    "ne.jp", "or.jp", "com.br", "com.cn", "com.mx", "com.tr", "co.in", "co.kr", "co.za",
    "com.sg", "com.hk",
];

/// Snapshot-swapped set of allowed registrable domains.
///
/// Readers clone the inner `Arc`, so a reload never exposes a half-built set.
#[derive(Default)]
pub struct DomainAllowList {
    domains: RwLock<Arc<HashSet<String>>>,
}

impl DomainAllowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `raw` and replaces the current contents in one step.
    /// Returns the number of distinct domains now loaded.
    pub fn load(&self, raw: &str) -> usize {
        let parsed = Arc::new(parse_allow_list(raw));
        let count = parsed.len();
        let mut guard = match self.domains.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = parsed;
        log_info!("loaded {} allow-listed domains", count);
        count
    }

    /// Exact, case-sensitive membership test on a registrable domain.
    pub fn contains(&self, domain: &str) -> bool {
        self.snapshot().contains(domain)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn snapshot(&self) -> Arc<HashSet<String>> {
        match self.domains.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

/// Line-oriented CSV (`rank,domain`). Lines with fewer than two fields or an
/// empty second field are skipped.
pub fn parse_allow_list(raw: &str) -> HashSet<String> {
    raw.lines()
        .filter_map(|line| {
            let mut fields = line.split(',').map(str::trim);
            let _rank = fields.next()?;
            let domain = fields.next()?;
            (!domain.is_empty()).then(|| domain.to_string())
        })
        .collect()
}

/// Normalizes a URL or bare hostname to its registrable domain:
/// lowercase host, trailing dot and port dropped, reduced to the last two
/// labels (three under a known two-level suffix). IP hosts are returned as-is.
pub fn registrable_domain(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let url = if trimmed.contains("://") {
        Url::parse(trimmed).ok()?
    } else {
        Url::parse(&format!("http://{trimmed}")).ok()?
    };

    let host = match url.host()? {
        Host::Domain(domain) => domain.trim_end_matches('.').to_ascii_lowercase(),
        Host::Ipv4(addr) => return Some(addr.to_string()),
        Host::Ipv6(addr) => return Some(addr.to_string()),
    };

    let labels: Vec<&str> = host.split('.').filter(|label| !label.is_empty()).collect();
    if labels.is_empty() {
        return None;
    }
    if labels.len() <= 2 {
        return Some(labels.join("."));
    }

    let suffix = labels[labels.len() - 2..].join(".");
    let keep = if TWO_LEVEL_SUFFIXES.contains(&suffix.as_str()) { 3 } else { 2 };
    Some(labels[labels.len() - keep..].join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_second_field_and_skips_malformed_lines() {
        let raw = "1,google.com\n2,example.com\nbroken-line\n3,\n4, youtube.com \n\n5,example.com";
        let set = parse_allow_list(raw);
        assert_eq!(set.len(), 3);
        assert!(set.contains("google.com"));
        assert!(set.contains("youtube.com"));
        assert!(set.contains("example.com"));
    }

    #[test]
    fn load_replaces_previous_contents() {
        let list = DomainAllowList::new();
        assert_eq!(list.load("1,a.com\n2,b.com"), 2);
        assert!(list.contains("a.com"));

        assert_eq!(list.load("1,c.com"), 1);
        assert!(!list.contains("a.com"));
        assert!(list.contains("c.com"));
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let list = DomainAllowList::new();
        list.load("1,example.com");
        assert!(list.contains("example.com"));
        assert!(!list.contains("Example.com"));
        assert!(!list.contains("www.example.com"));
    }

    #[test]
    fn registrable_domain_normalizes_hosts() {
        assert_eq!(
            registrable_domain("https://www.Example.com/login?next=/").as_deref(),
            Some("example.com")
        );
        assert_eq!(registrable_domain("mail.google.com").as_deref(), Some("google.com"));
        assert_eq!(registrable_domain("news.bbc.co.uk").as_deref(), Some("bbc.co.uk"));
        assert_eq!(registrable_domain("example.com.").as_deref(), Some("example.com"));
        assert_eq!(registrable_domain("localhost:8080").as_deref(), Some("localhost"));
        assert_eq!(registrable_domain("http://127.0.0.1/x").as_deref(), Some("127.0.0.1"));
        assert_eq!(registrable_domain("   "), None);
    }
}
