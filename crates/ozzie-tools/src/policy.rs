use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    Auto,
    Ask,
    Deny,
}

/// Per-tool auto-approve / deny glob lists, checked deny-first then
/// auto-then-default.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    pub auto_patterns: Vec<String>,
    pub deny_patterns: Vec<String>,
}

/// Translates a small glob dialect (`*` -> any run of characters, `?` -> any
/// single character, everything else literal) into an anchored regex.
pub fn glob_to_regex(glob: &str) -> Regex {
    let mut pattern = String::from("^");
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).expect("glob_to_regex always builds a valid regex")
}

impl ToolPolicy {
    pub fn decide(&self, candidate: &str, default: ApprovalPolicy) -> ApprovalPolicy {
        if self.deny_patterns.iter().any(|p| glob_to_regex(p).is_match(candidate)) {
            return ApprovalPolicy::Deny;
        }
        if self.auto_patterns.iter().any(|p| glob_to_regex(p).is_match(candidate)) {
            return ApprovalPolicy::Auto;
        }
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_matches_any_suffix() {
        let re = glob_to_regex("rm -rf*");
        assert!(re.is_match("rm -rf /tmp/foo"));
        assert!(!re.is_match("echo rm -rf /tmp/foo"));
    }

    #[test]
    fn deny_takes_priority_over_auto() {
        let policy = ToolPolicy {
            auto_patterns: vec!["git *".into()],
            deny_patterns: vec!["git push --force*".into()],
        };
        assert_eq!(policy.decide("git push --force origin main", ApprovalPolicy::Ask), ApprovalPolicy::Deny);
        assert_eq!(policy.decide("git status", ApprovalPolicy::Ask), ApprovalPolicy::Auto);
    }

    #[test]
    fn unmatched_candidate_falls_back_to_default() {
        let policy = ToolPolicy::default();
        assert_eq!(policy.decide("anything", ApprovalPolicy::Ask), ApprovalPolicy::Ask);
    }
}
