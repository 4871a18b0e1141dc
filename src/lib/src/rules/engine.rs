use super::rule::{ArtifactRule, ArtifactType, MatchDestination, RuleVerb};
use super::clean_path;
use crate::error::InTotoError;
use crate::models::{ArtifactMap, Link};
use crate::verify::{Enforcement, Finding};

use std::collections::{BTreeMap, BTreeSet};

/// Apply a rule list to the materials or products of one step or inspection.
///
/// Every recorded path starts out queued. Rules run in order and each removes
/// the queued paths it accounts for. A DISALLOW rule that still finds a
/// queued path stops evaluation with a violation. Paths left in the queue
/// after the last rule are violations as well.
///
/// `links` holds the verified link of every step and is used to resolve
/// MATCH destinations. Returns the violations found; an empty list means the
/// artifacts are authorized. Malformed rules are an error.
pub fn verify_item_rules(
    item: &str,
    artifact_type: ArtifactType,
    rules: &[Vec<String>],
    artifacts: &ArtifactMap,
    links: &BTreeMap<String, Link>,
) -> Result<Vec<Finding>, InTotoError> {
    let rules = ArtifactRule::parse_all(rules)?;
    let mut queue: BTreeSet<&str> = artifacts.keys().map(String::as_str).collect();

    for rule in &rules {
        let consumed: Vec<&str> = match (&rule.verb, &rule.destination) {
            (RuleVerb::Match, Some(dest)) => match_rule(rule, dest, &queue, artifacts, links),
            _ => queue
                .iter()
                .copied()
                .filter(|path| rule.pattern.is_match(path))
                .collect(),
        };

        if rule.verb == RuleVerb::Disallow {
            if consumed.is_empty() {
                continue;
            }
            log::debug!("{} {}: rule '{}' matched {:?}", item, artifact_type, rule, consumed);
            let finding = Finding::fail(
                "artifact_rules.disallow",
                item,
                Enforcement::Strict,
                format!("{} disallowed by rule '{}'", artifact_type, rule),
            )
            .with_details(consumed.join(", "));
            return Ok(vec![finding]);
        }

        log::debug!("{} {}: rule '{}' consumed {:?}", item, artifact_type, rule, consumed);
        for path in consumed {
            queue.remove(path);
        }
    }

    if queue.is_empty() {
        return Ok(Vec::new());
    }
    let remaining: Vec<&str> = queue.into_iter().collect();
    Ok(vec![Finding::fail(
        "artifact_rules.unmatched",
        item,
        Enforcement::Strict,
        format!("{} not authorized by any rule", artifact_type),
    )
    .with_details(remaining.join(", "))])
}

/// Queued paths whose artifact has an identical digest set at the
/// corresponding path of the destination step's link.
fn match_rule<'a>(
    rule: &ArtifactRule,
    dest: &MatchDestination,
    queue: &BTreeSet<&'a str>,
    artifacts: &ArtifactMap,
    links: &BTreeMap<String, Link>,
) -> Vec<&'a str> {
    let Some(dest_link) = links.get(&dest.step) else {
        log::debug!("rule '{}': no link for step '{}'", rule, dest.step);
        return Vec::new();
    };
    let dest_artifacts = match dest.artifact_type {
        ArtifactType::Materials => &dest_link.materials,
        ArtifactType::Products => &dest_link.products,
    };

    let mut consumed = Vec::new();
    for &path in queue {
        let Some(base) = path.strip_prefix(rule.source_prefix.as_str()) else {
            continue;
        };
        if !rule.pattern.is_match(base) {
            continue;
        }
        let dest_path = clean_path(&format!("{}{}", dest.prefix, base));
        match (artifacts.get(path), dest_artifacts.get(&dest_path)) {
            (Some(ours), Some(theirs)) if ours == theirs => consumed.push(path),
            (_, None) => log::debug!("rule '{}': '{}' not found in '{}'", rule, dest_path, dest.step),
            _ => log::debug!("rule '{}': digests of '{}' differ from '{}'", rule, path, dest_path),
        }
    }
    consumed
}
