use super::clean_path;
use super::glob::Glob;
use crate::error::InTotoError;
use std::fmt;

/// Rule keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleVerb {
    Match,
    Create,
    Delete,
    Modify,
    Allow,
    Disallow,
}

impl RuleVerb {
    fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "match" => Some(RuleVerb::Match),
            "create" => Some(RuleVerb::Create),
            "delete" => Some(RuleVerb::Delete),
            "modify" => Some(RuleVerb::Modify),
            "allow" => Some(RuleVerb::Allow),
            "disallow" => Some(RuleVerb::Disallow),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleVerb::Match => "MATCH",
            RuleVerb::Create => "CREATE",
            RuleVerb::Delete => "DELETE",
            RuleVerb::Modify => "MODIFY",
            RuleVerb::Allow => "ALLOW",
            RuleVerb::Disallow => "DISALLOW",
        }
    }
}

/// Which artifact list of a link a rule or destination refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactType {
    Materials,
    Products,
}

impl ArtifactType {
    fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "materials" => Some(ArtifactType::Materials),
            "products" => Some(ArtifactType::Products),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Materials => "materials",
            ArtifactType::Products => "products",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a MATCH rule looks for the corresponding artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchDestination {
    pub artifact_type: ArtifactType,
    /// Empty, or ends with `/`.
    pub prefix: String,
    pub step: String,
}

/// A parsed artifact rule.
///
/// Accepted forms (keywords are case-insensitive):
///
/// ```text
/// CREATE <pattern>
/// DELETE <pattern>
/// MODIFY <pattern>
/// ALLOW <pattern>
/// DISALLOW <pattern>
/// MATCH <pattern> [IN <source-prefix>] WITH (MATERIALS|PRODUCTS)
///       [IN <destination-prefix>] FROM <step>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRule {
    pub verb: RuleVerb,
    pub pattern: Glob,
    /// Empty, or ends with `/`. Only meaningful for MATCH.
    pub source_prefix: String,
    pub destination: Option<MatchDestination>,
}

fn syntax_error(tokens: &[String], reason: &str) -> InTotoError {
    InTotoError::RuleSyntax(format!("'{}': {}", tokens.join(" "), reason))
}

fn keyword(token: &str, expected: &str) -> bool {
    token.eq_ignore_ascii_case(expected)
}

/// Clean a non-empty prefix and make it end with `/`.
fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        return String::new();
    }
    let cleaned = clean_path(prefix);
    if cleaned.ends_with('/') {
        cleaned
    } else {
        format!("{}/", cleaned)
    }
}

impl ArtifactRule {
    pub fn parse(tokens: &[String]) -> Result<Self, InTotoError> {
        let first = tokens
            .first()
            .ok_or_else(|| InTotoError::RuleSyntax("empty rule".to_string()))?;
        let verb = RuleVerb::parse(first).ok_or_else(|| syntax_error(tokens, "unknown rule keyword"))?;

        if verb != RuleVerb::Match {
            if tokens.len() != 2 {
                return Err(syntax_error(
                    tokens,
                    &format!("expected '{} <pattern>'", verb.as_str()),
                ));
            }
            return Ok(ArtifactRule {
                verb,
                pattern: Glob::new(&tokens[1])?,
                source_prefix: String::new(),
                destination: None,
            });
        }

        // MATCH <pattern> [IN <src>] WITH <type> [IN <dst>] FROM <step>
        let (source_prefix, rest) = match tokens.len() {
            10 | 8 if keyword(&tokens[2], "in") => (tokens[3].as_str(), &tokens[4..]),
            8 | 6 => ("", &tokens[2..]),
            _ => return Err(syntax_error(tokens, "wrong number of tokens for MATCH")),
        };
        let (artifact_type, dest_prefix, step) = match rest {
            [with, ty, from, step] if keyword(with, "with") && keyword(from, "from") => (ty, "", step),
            [with, ty, inn, dst, from, step]
                if keyword(with, "with") && keyword(inn, "in") && keyword(from, "from") =>
            {
                (ty, dst.as_str(), step)
            }
            _ => return Err(syntax_error(tokens, "malformed MATCH rule")),
        };
        let artifact_type = ArtifactType::parse(artifact_type)
            .ok_or_else(|| syntax_error(tokens, "destination must be MATERIALS or PRODUCTS"))?;

        // MATCH compares cleaned paths, so the pattern is cleaned as well.
        let pattern = if tokens[1].is_empty() {
            Glob::new("")?
        } else {
            Glob::new(&clean_path(&tokens[1]))?
        };

        Ok(ArtifactRule {
            verb,
            pattern,
            source_prefix: normalize_prefix(source_prefix),
            destination: Some(MatchDestination {
                artifact_type,
                prefix: normalize_prefix(dest_prefix),
                step: step.clone(),
            }),
        })
    }

    /// Parse every rule of a rule list, failing on the first bad one.
    pub fn parse_all(rules: &[Vec<String>]) -> Result<Vec<Self>, InTotoError> {
        rules.iter().map(|tokens| Self::parse(tokens)).collect()
    }
}

impl fmt::Display for ArtifactRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verb.as_str(), self.pattern)?;
        if let Some(dest) = &self.destination {
            if !self.source_prefix.is_empty() {
                write!(f, " IN {}", self.source_prefix)?;
            }
            write!(f, " WITH {}", dest.artifact_type.as_str().to_uppercase())?;
            if !dest.prefix.is_empty() {
                write!(f, " IN {}", dest.prefix)?;
            }
            write!(f, " FROM {}", dest.step)?;
        }
        Ok(())
    }
}
