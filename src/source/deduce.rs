//! Project-root deduction from an arbitrary import path.
//!
//! Matchers run in order: known hosting patterns first (cheap, regex-only),
//! then vanity-import HTML discovery as the fallback requiring a
//! network round trip.

use std::sync::LazyLock;

use regex::Regex;

use crate::identifier::ProjectRoot;

/// One or more candidate source URLs a project root might be fetched from,
/// tried in order by the source manager until one successfully lists refs.
#[derive(Clone, Debug)]
pub struct DeducedRoot {
    pub root: ProjectRoot,
    pub candidate_urls: Vec<String>,
}

struct HostPattern {
    regex: &'static LazyLock<Regex>,
    url_template: fn(&regex::Captures) -> Vec<String>,
}

static GITHUB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<root>github\.com/[A-Za-z0-9_.\-]+/[A-Za-z0-9_.\-]+)(/.*)?$").unwrap()
});
static BITBUCKET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<root>bitbucket\.org/[A-Za-z0-9_.\-]+/[A-Za-z0-9_.\-]+)(/.*)?$").unwrap()
});
static LAUNCHPAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<root>launchpad\.net/[A-Za-z0-9_.\-]+)(/.*)?$").unwrap()
});
static APACHE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<root>git\.apache\.org/[A-Za-z0-9_.\-]+\.git)(/.*)?$").unwrap()
});
static GOPKG_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<root>gopkg\.in/(?:[A-Za-z0-9_.\-]+/)?[A-Za-z0-9_.\-]+\.v\d+)(/.*)?$").unwrap()
});
static VCS_EXTENSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<root>[A-Za-z0-9_.\-/]+\.(git|hg|bzr))(/.*)?$").unwrap()
});

fn host_patterns() -> Vec<HostPattern> {
    vec![
        HostPattern {
            regex: &GITHUB,
            url_template: |c| vec![format!("https://{}.git", &c["root"])],
        },
        HostPattern {
            regex: &BITBUCKET,
            url_template: |c| vec![format!("https://{}.git", &c["root"]), format!("https://{}", &c["root"])],
        },
        HostPattern {
            regex: &LAUNCHPAD,
            url_template: |c| vec![format!("https://{}", &c["root"])],
        },
        HostPattern {
            regex: &APACHE,
            url_template: |c| vec![format!("https://{}", &c["root"])],
        },
        HostPattern {
            regex: &GOPKG_IN,
            url_template: |c| vec![format!("https://{}", &c["root"])],
        },
        HostPattern {
            regex: &VCS_EXTENSION,
            url_template: |c| vec![format!("https://{}", &c["root"])],
        },
    ]
}

/// Tries every known hosting pattern against `import_path`, in order.
/// Returns `None` when nothing matches, leaving the vanity-import fallback
/// as the caller's next step.
pub fn deduce_from_known_patterns(import_path: &str) -> Option<DeducedRoot> {
    for pattern in host_patterns() {
        if let Some(caps) = pattern.regex.captures(import_path) {
            let root = caps["root"].to_string();
            let urls = (pattern.url_template)(&caps);
            return Some(DeducedRoot { root: ProjectRoot::new(root), candidate_urls: urls });
        }
    }
    None
}

/// A discovered `go-import`-style meta entry from a vanity-import HTML
/// document: `<meta name="go-import" content="root vcs url">`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VanityImport {
    pub root: String,
    pub vcs: String,
    pub url: String,
}

static META_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"<meta\s+name=["']go-import["']\s+content=["']([^"']+)\s+([^"']+)\s+([^"']+)["']\s*/?>"#,
    )
    .unwrap()
});

/// Scans an HTML discovery document's body for `go-import` meta tags.
pub fn scan_vanity_meta_tags(html: &str) -> Vec<VanityImport> {
    META_TAG
        .captures_iter(html)
        .map(|c| VanityImport {
            root: c[1].to_string(),
            vcs: c[2].to_string(),
            url: c[3].to_string(),
        })
        .collect()
}

/// Builds the discovery URL for `import_path`: an HTTP GET of
/// `https://{host}/{path}?go-get=1`.
pub fn discovery_url(import_path: &str) -> String {
    format!("https://{import_path}?go-get=1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_pattern_deduces_root_and_url() {
        let d = deduce_from_known_patterns("github.com/foo/bar/sub/pkg").unwrap();
        assert_eq!(d.root, ProjectRoot::new("github.com/foo/bar"));
        assert_eq!(d.candidate_urls, vec!["https://github.com/foo/bar.git".to_string()]);
    }

    #[test]
    fn deduction_is_idempotent_on_root_itself() {
        let a = deduce_from_known_patterns("github.com/foo/bar").unwrap();
        let b = deduce_from_known_patterns("github.com/foo/bar/sub").unwrap();
        assert_eq!(a.root, b.root);
    }

    #[test]
    fn gopkg_in_versioned_root() {
        let d = deduce_from_known_patterns("gopkg.in/yaml.v2/sub").unwrap();
        assert_eq!(d.root, ProjectRoot::new("gopkg.in/yaml.v2"));
    }

    #[test]
    fn unknown_host_returns_none() {
        assert!(deduce_from_known_patterns("example.internal/foo/bar").is_none());
    }

    #[test]
    fn scans_go_import_meta_tag() {
        let html = r#"<html><head><meta name="go-import" content="example.org/pkg git https://example.org/pkg.git"></head></html>"#;
        let found = scan_vanity_meta_tags(html);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].root, "example.org/pkg");
        assert_eq!(found[0].vcs, "git");
        assert_eq!(found[0].url, "https://example.org/pkg.git");
    }
}
