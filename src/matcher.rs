//! Keyword rules applied to item titles.
//!
//! A rule is either a plain, case-sensitive substring or, when written with a
//! `re:` prefix, a regular expression.  Rules are compiled once when the
//! configuration loads and are read-only afterwards.

use regex::Regex;

use crate::error::ConfigError;

const REGEX_PREFIX: &str = "re:";

#[derive(Debug, Clone)]
enum Rule {
    Substring(String),
    Pattern { source: String, regex: Regex },
}

impl Rule {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.strip_prefix(REGEX_PREFIX) {
            Some(pattern) => {
                let regex = Regex::new(pattern).map_err(|source| ConfigError::Keyword {
                    rule: raw.to_string(),
                    source,
                })?;
                Ok(Rule::Pattern {
                    source: raw.to_string(),
                    regex,
                })
            }
            None => Ok(Rule::Substring(raw.to_string())),
        }
    }

    fn is_match(&self, title: &str) -> bool {
        match self {
            Rule::Substring(needle) => title.contains(needle.as_str()),
            Rule::Pattern { regex, .. } => regex.is_match(title),
        }
    }

    fn label(&self) -> &str {
        match self {
            Rule::Substring(needle) => needle,
            Rule::Pattern { source, .. } => source,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeywordMatcher {
    rules: Vec<Rule>,
}

impl KeywordMatcher {
    /// Compile `rules`.  Empty strings are dropped, since they would match
    /// every title.
    pub fn new<S: AsRef<str>>(rules: &[S]) -> Result<Self, ConfigError> {
        let rules = rules
            .iter()
            .map(|r| r.as_ref())
            .filter(|r| !r.is_empty())
            .map(Rule::parse)
            .collect::<Result<_, _>>()?;
        Ok(Self { rules })
    }

    /// The announcement text for `title`, or `None` when no rule matches.
    pub fn matches(&self, title: &str) -> Option<String> {
        self.rules
            .iter()
            .find(|rule| rule.is_match(title))
            .map(|rule| format!("Keyword [{}] matched: {title}", rule.label()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}
