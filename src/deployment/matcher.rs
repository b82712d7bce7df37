use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix selecting regular-expression syntax for a pattern
pub const REGEX_PREFIX: &str = "regex:";

/// What to do when a pattern matches more than one deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchPolicy {
    /// Every match
    All,
    /// Only the lexicographically first match
    First,
    /// Refuse when there is more than one match
    #[default]
    Fail,
}

impl FromStr for MatchPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(MatchPolicy::All),
            "FIRST" => Ok(MatchPolicy::First),
            "FAIL" => Ok(MatchPolicy::Fail),
            other => Err(Error::ConfigInvalid(format!(
                "Unknown match policy '{}', expected ALL, FIRST or FAIL",
                other
            ))),
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchPolicy::All => "ALL",
            MatchPolicy::First => "FIRST",
            MatchPolicy::Fail => "FAIL",
        })
    }
}

/// How a pattern string is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternSyntax {
    Exact,
    /// `*` matches any run of characters, `?` any single character
    Glob,
    /// Must match the whole name
    Regex,
}

/// A compiled deployment name pattern.
#[derive(Debug, Clone)]
pub struct MatchPattern {
    source: String,
    syntax: PatternSyntax,
    regex: Option<Regex>,
}

impl MatchPattern {
    /// Infers the syntax: a `regex:` prefix selects a regex, `*` or `?`
    /// selects a glob, anything else is an exact name.
    ///
    /// ```
    /// use appserver_runner::deployment::{MatchPattern, PatternSyntax};
    ///
    /// assert_eq!(MatchPattern::parse("app.war").unwrap().syntax(), PatternSyntax::Exact);
    /// assert_eq!(MatchPattern::parse("app-*.war").unwrap().syntax(), PatternSyntax::Glob);
    /// assert_eq!(MatchPattern::parse("regex:app-\\d+\\.war").unwrap().syntax(), PatternSyntax::Regex);
    /// ```
    pub fn parse(pattern: &str) -> Result<Self> {
        if let Some(regex) = pattern.strip_prefix(REGEX_PREFIX) {
            Self::with_syntax(regex, PatternSyntax::Regex)
        } else if pattern.contains(['*', '?']) {
            Self::with_syntax(pattern, PatternSyntax::Glob)
        } else {
            Self::with_syntax(pattern, PatternSyntax::Exact)
        }
    }

    /// Compiles `pattern` with an explicit syntax
    pub fn with_syntax(pattern: &str, syntax: PatternSyntax) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::ConfigInvalid("Empty deployment pattern".to_string()));
        }
        let regex = match syntax {
            PatternSyntax::Exact => None,
            PatternSyntax::Glob => Some(compile(&glob_to_regex(pattern), pattern)?),
            PatternSyntax::Regex => Some(compile(&format!("^(?:{})$", pattern), pattern)?),
        };
        Ok(Self {
            source: pattern.to_string(),
            syntax,
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn syntax(&self) -> PatternSyntax {
        self.syntax
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(name),
            None => self.source == name,
        }
    }
}

impl fmt::Display for MatchPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.syntax {
            PatternSyntax::Regex => write!(f, "{}{}", REGEX_PREFIX, self.source),
            _ => f.write_str(&self.source),
        }
    }
}

fn compile(regex: &str, pattern: &str) -> Result<Regex> {
    Regex::new(regex)
        .map_err(|e| Error::ConfigInvalid(format!("Invalid pattern '{}': {}", pattern, e)))
}

fn glob_to_regex(glob: &str) -> String {
    let mut regex = String::with_capacity(glob.len() + 8);
    regex.push('^');
    for c in glob.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            c => regex.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    regex.push('$');
    regex
}

/// Resolves patterns against a deployment set.
pub struct DeploymentMatcher;

impl DeploymentMatcher {
    /// Every matching name, sorted and without duplicates
    pub fn candidates<'a, I>(pattern: &MatchPattern, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut candidates: Vec<String> = names
            .into_iter()
            .filter(|name| pattern.matches(name))
            .map(str::to_string)
            .collect();
        candidates.sort();
        candidates.dedup();
        candidates
    }

    /// The names to undeploy under `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AmbiguousMatch`] under [`MatchPolicy::Fail`] when
    /// more than one name matches.
    ///
    /// ```
    /// use appserver_runner::deployment::{DeploymentMatcher, MatchPattern, MatchPolicy};
    ///
    /// let pattern = MatchPattern::parse("a*").unwrap();
    /// let names = ["ab.war", "a.war", "b.war"];
    ///
    /// let first = DeploymentMatcher::resolve(&pattern, MatchPolicy::First, names).unwrap();
    /// assert_eq!(first, vec!["a.war"]);
    /// assert!(DeploymentMatcher::resolve(&pattern, MatchPolicy::Fail, names).is_err());
    /// ```
    pub fn resolve<'a, I>(pattern: &MatchPattern, policy: MatchPolicy, names: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut candidates = Self::candidates(pattern, names);
        match policy {
            MatchPolicy::All => Ok(candidates),
            MatchPolicy::First => {
                candidates.truncate(1);
                Ok(candidates)
            }
            MatchPolicy::Fail if candidates.len() > 1 => Err(Error::AmbiguousMatch {
                pattern: pattern.to_string(),
                candidates,
            }),
            MatchPolicy::Fail => Ok(candidates),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMES: [&str; 2] = ["a.war", "ab.war"];

    #[test]
    fn test_policies_over_glob() {
        let pattern = MatchPattern::parse("a*").unwrap();

        let all = DeploymentMatcher::resolve(&pattern, MatchPolicy::All, NAMES).unwrap();
        assert_eq!(all, vec!["a.war", "ab.war"]);

        let first = DeploymentMatcher::resolve(&pattern, MatchPolicy::First, NAMES).unwrap();
        assert_eq!(first, vec!["a.war"]);

        match DeploymentMatcher::resolve(&pattern, MatchPolicy::Fail, NAMES) {
            Err(Error::AmbiguousMatch { candidates, .. }) => {
                assert_eq!(candidates, vec!["a.war", "ab.war"])
            }
            other => panic!("expected ambiguous match, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_matches_is_not_an_error() {
        let pattern = MatchPattern::parse("z*").unwrap();
        for policy in [MatchPolicy::All, MatchPolicy::First, MatchPolicy::Fail] {
            assert!(DeploymentMatcher::resolve(&pattern, policy, NAMES).unwrap().is_empty());
        }
    }

    #[test]
    fn test_glob_escapes_dots() {
        let pattern = MatchPattern::parse("a?war").unwrap();
        assert!(pattern.matches("a.war"));
        assert!(!pattern.matches("ab.war"));

        let exact = MatchPattern::parse("a.war").unwrap();
        assert!(exact.matches("a.war"));
        assert!(!exact.matches("aXwar"));
    }

    #[test]
    fn test_regex_matches_whole_name() {
        let pattern = MatchPattern::parse("regex:a.*").unwrap();
        assert!(pattern.matches("ab.war"));

        let partial = MatchPattern::with_syntax("b", PatternSyntax::Regex).unwrap();
        assert!(!partial.matches("ab.war"));

        assert!(MatchPattern::parse("regex:(").is_err());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("first".parse::<MatchPolicy>().unwrap(), MatchPolicy::First);
        assert!("SOME".parse::<MatchPolicy>().is_err());
        assert_eq!(MatchPolicy::default(), MatchPolicy::Fail);
    }
}
