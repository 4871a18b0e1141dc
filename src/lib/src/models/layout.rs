use super::{is_hex, null_as_default};
use crate::certificate::CertificateConstraint;
use crate::error::InTotoError;
use crate::rules::ArtifactRule;
use crate::signature::Key;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Format of [`Layout::expires`].
pub const EXPIRES_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    #[default]
    Step,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InspectionType {
    #[default]
    Inspection,
}

fn default_threshold() -> usize {
    1
}

/// A step of the supply chain, carried out by authorized functionaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    #[serde(rename = "_type", default)]
    pub kind: StepType,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub expected_materials: Vec<Vec<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub expected_products: Vec<Vec<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pubkeys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub cert_constraints: Vec<CertificateConstraint>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub expected_command: Vec<String>,
    #[serde(default = "default_threshold")]
    pub threshold: usize,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Step {
            kind: StepType::Step,
            name: name.into(),
            expected_materials: Vec::new(),
            expected_products: Vec::new(),
            pubkeys: Vec::new(),
            cert_constraints: Vec::new(),
            expected_command: Vec::new(),
            threshold: 1,
        }
    }
}

/// A command the verifier runs itself after the steps have been checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Inspection {
    #[serde(rename = "_type", default)]
    pub kind: InspectionType,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub expected_materials: Vec<Vec<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub expected_products: Vec<Vec<String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub run: Vec<String>,
}

impl Inspection {
    pub fn new(name: impl Into<String>, run: Vec<String>) -> Self {
        Inspection {
            kind: InspectionType::Inspection,
            name: name.into(),
            expected_materials: Vec::new(),
            expected_products: Vec::new(),
            run,
        }
    }
}

/// The supply chain policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Layout {
    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: Vec<Step>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub inspect: Vec<Inspection>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub keys: BTreeMap<String, Key>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "null_as_default")]
    pub rootcas: BTreeMap<String, Key>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "null_as_default")]
    pub intermediatecas: BTreeMap<String, Key>,
    pub expires: String,
    #[serde(default)]
    pub readme: String,
}

impl Default for Layout {
    /// An empty layout that expires one month from now.
    fn default() -> Self {
        let expires = (Utc::now() + Duration::days(30)).format(EXPIRES_FORMAT).to_string();
        Layout {
            steps: Vec::new(),
            inspect: Vec::new(),
            keys: BTreeMap::new(),
            rootcas: BTreeMap::new(),
            intermediatecas: BTreeMap::new(),
            expires,
            readme: String::new(),
        }
    }
}

impl Layout {
    /// Embed the public half of `key` as a functionary or layout key.
    pub fn add_key(&mut self, key: &Key) {
        self.keys.insert(key.key_id().to_string(), key.public_only());
    }

    pub fn expires_at(&self) -> Result<DateTime<Utc>, InTotoError> {
        NaiveDateTime::parse_from_str(&self.expires, EXPIRES_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|e| {
                InTotoError::InvalidMetadata(format!("expires '{}' is not {}: {}", self.expires, EXPIRES_FORMAT, e))
            })
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn validate(&self) -> Result<(), InTotoError> {
        self.expires_at()?;
        validate_keys("keys", &self.keys, false)?;
        validate_keys("rootcas", &self.rootcas, true)?;
        validate_keys("intermediatecas", &self.intermediatecas, true)?;

        let mut names = BTreeSet::new();
        let items = self
            .steps
            .iter()
            .map(|s| (&s.name, &s.expected_materials, &s.expected_products))
            .chain(
                self.inspect
                    .iter()
                    .map(|i| (&i.name, &i.expected_materials, &i.expected_products)),
            );
        for (name, materials, products) in items {
            if name.is_empty() || name.contains('/') {
                return Err(InTotoError::InvalidMetadata(format!("invalid step or inspection name '{}'", name)));
            }
            if !names.insert(name.as_str()) {
                return Err(InTotoError::InvalidMetadata(format!(
                    "step and inspection names must be unique, found duplicate '{}'",
                    name
                )));
            }
            ArtifactRule::parse_all(materials)?;
            ArtifactRule::parse_all(products)?;
        }

        for step in &self.steps {
            if step.threshold == 0 {
                return Err(InTotoError::InvalidMetadata(format!(
                    "step '{}' has a threshold of zero",
                    step.name
                )));
            }
            if let Some(bad) = step.pubkeys.iter().find(|k| !is_hex(k)) {
                return Err(InTotoError::InvalidMetadata(format!(
                    "step '{}' lists a non-hex key id '{}'",
                    step.name, bad
                )));
            }
        }
        Ok(())
    }
}

fn validate_keys(field: &str, keys: &BTreeMap<String, Key>, needs_certificate: bool) -> Result<(), InTotoError> {
    for (keyid, key) in keys {
        if !is_hex(keyid) {
            return Err(InTotoError::InvalidMetadata(format!("{}: key id '{}' is not hex", field, keyid)));
        }
        if key.key_id() != keyid.as_str() || key.derive_key_id()? != *keyid {
            return Err(InTotoError::InvalidMetadata(format!(
                "{}: key id '{}' does not match the key it maps to",
                field, keyid
            )));
        }
        if key.has_private() {
            return Err(InTotoError::InvalidMetadata(format!(
                "{}: key '{}' contains private material",
                field, keyid
            )));
        }
        if needs_certificate && key.certificate().is_none() {
            return Err(InTotoError::InvalidMetadata(format!(
                "{}: key '{}' carries no certificate",
                field, keyid
            )));
        }
    }
    Ok(())
}
