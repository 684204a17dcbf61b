//! Derived resource names.
//!
//! Every cluster object name the orchestrator emits is computed here so the
//! catalog, planner and monitors agree on them.

use sha2::{Digest, Sha256};

use crate::types::Namespace;

/// Separator substituted for each run of invalid characters.
pub const SEPARATOR: char = '-';

/// Longest name the cluster accepts for a namespace.
pub const NAMESPACE_MAX_LEN: usize = 63;

/// Port every web-facing process listens on.
pub const SERVICE_PORT: u16 = 8000;

/// Make an arbitrary string safe for namespaces and image tags.
///
/// ASCII letters are lower-cased and kept along with digits. Every maximal
/// run of any other characters becomes a single [`SEPARATOR`], including at
/// either end, so `"Fix/ABC-123!!"` becomes `"fix-abc-123-"`.
#[must_use]
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_run = false;

    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            in_run = false;
        } else if !in_run {
            out.push(SEPARATOR);
            in_run = true;
        }
    }

    out
}

/// Hex digits of the digest kept when a namespace has to be shortened.
const DIGEST_LEN: usize = 8;

/// Namespace requested for a branch's ephemeral environment.
///
/// Both parts are sanitised, so the result is ASCII. Names longer than
/// [`NAMESPACE_MAX_LEN`] keep a readable prefix and end in a short SHA-256
/// digest of the full name, so branches sharing a long prefix stay distinct.
#[must_use]
pub fn ephemeral_namespace(service: &str, branch: &str) -> String {
    let name = format!("{}{SEPARATOR}{}", sanitize(service), sanitize(branch));
    if name.len() <= NAMESPACE_MAX_LEN {
        return name;
    }

    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    let prefix = name[..NAMESPACE_MAX_LEN - DIGEST_LEN - 1].trim_end_matches(SEPARATOR);
    format!("{prefix}{SEPARATOR}{}", &digest[..DIGEST_LEN])
}

/// Subdomain for a process's public route.
#[must_use]
pub fn route_subdomain(namespace: &Namespace, process: &str) -> String {
    format!("{namespace}-{process}")
}

/// Internal service endpoint an uptime monitor watches.
#[must_use]
pub fn monitored_service(namespace: &Namespace, process: &str) -> String {
    format!("{namespace}-{process}-{SERVICE_PORT}_kubernetes")
}

/// Name of the one-shot migration task.
#[must_use]
pub fn migration_task(service: &str) -> String {
    format!("{service}-db-migration")
}

/// Secret store holding an environment's credentials.
#[must_use]
pub fn secret_store(service: &str, environment: &str) -> String {
    format!("{service}-{environment}")
}

/// Image repository name for the health-monitor binary.
#[must_use]
pub fn monitor_image(service: &str) -> String {
    format!("{service}-monitor")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("Fix/ABC-123!!", "fix-abc-123-")]
    #[case("feature/login", "feature-login")]
    #[case("a__--//b", "a-b")]
    #[case("!!start", "-start")]
    #[case("master", "master")]
    #[case("MiXeD.Case 42", "mixed-case-42")]
    #[case("émoji🚀branch", "-moji-branch")]
    fn sanitize_collapses_invalid_runs(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize(raw), expected);
    }

    #[test]
    fn sanitize_never_emits_consecutive_separators() {
        let out = sanitize("x!@#$%^&*()y__z");
        assert_eq!(out, "x-y-z");
        assert!(!out.contains("--"));
        assert!(out
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == SEPARATOR));
    }

    #[test]
    fn ephemeral_namespace_prefixed_and_bounded() {
        assert_eq!(
            ephemeral_namespace("watchtower", "Fix/ABC-123!!"),
            "watchtower-fix-abc-123-"
        );

        let long = "b".repeat(200);
        assert_eq!(ephemeral_namespace("watchtower", &long).len(), NAMESPACE_MAX_LEN);
    }

    #[rstest]
    #[case("feature/a", "feature/b")]
    #[case("Feature/A", "feature/b")]
    #[case(
        "feature/xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx-alpha",
        "feature/xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx-beta"
    )]
    fn different_branches_get_different_namespaces(#[case] a: &str, #[case] b: &str) {
        let first = ephemeral_namespace("watchtower", a);
        let second = ephemeral_namespace("watchtower", b);
        assert_ne!(first, second);
        assert!(first.len() <= NAMESPACE_MAX_LEN);
        assert!(second.len() <= NAMESPACE_MAX_LEN);
    }

    #[test]
    fn shortened_namespace_keeps_prefix_and_digest() {
        let branch = format!("release/{}", "y".repeat(80));
        let name = ephemeral_namespace("watchtower", &branch);

        assert_eq!(name.len(), NAMESPACE_MAX_LEN);
        assert!(name.starts_with("watchtower-release-yyyy"));
        let (_, digest) = name.rsplit_once(SEPARATOR).unwrap();
        assert_eq!(digest.len(), DIGEST_LEN);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));

        assert_eq!(name, ephemeral_namespace("watchtower", &branch));
    }

    #[test]
    fn shortened_namespace_has_no_doubled_separator() {
        // the cut lands right after a separator
        let branch = format!("{}/{}", "a".repeat(42), "b".repeat(40));
        let name = ephemeral_namespace("watchtower", &branch);
        assert!(!name.contains("--"), "{name}");
        assert!(name.len() <= NAMESPACE_MAX_LEN);
    }

    #[test]
    fn multibyte_service_name_is_sanitised() {
        let name = ephemeral_namespace(&"é".repeat(40), "main");
        assert_eq!(name, "--main");
        assert!(name.is_ascii());

        let long = ephemeral_namespace(&"é日".repeat(30), &"ü".repeat(100));
        assert!(long.is_ascii());
        assert!(long.len() <= NAMESPACE_MAX_LEN);
    }

    #[test]
    fn derived_names() {
        let ns = Namespace::new("watchtower");
        assert_eq!(route_subdomain(&ns, "web"), "watchtower-web");
        assert_eq!(
            monitored_service(&ns, "web"),
            "watchtower-web-8000_kubernetes"
        );
        assert_eq!(migration_task("watchtower"), "watchtower-db-migration");
        assert_eq!(secret_store("watchtower", "prod"), "watchtower-prod");
    }
}
