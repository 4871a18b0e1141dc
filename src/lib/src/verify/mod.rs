//! Layout verification.
//!
//! [`LayoutVerifier::verify`] checks a signed layout against the links
//! functionaries recorded for its steps:
//!
//! 1. the layout must be signed by the caller's trusted key(s)
//! 2. the layout must not have expired
//! 3. each step needs `threshold` links signed by authorized functionaries,
//!    and those links must agree with each other; a functionary may sign a
//!    sublayout instead of a link, which is verified recursively against the
//!    links in `<step>.<keyid[..8]>/` and stands in for its link
//! 4. each link's command is compared with the step's expected command
//! 5. the artifact rules of every step must hold
//! 6. inspections are run and their artifact rules must hold
//!
//! # Usage
//!
//! ```rust,ignore
//! use intoto::verify::{LayoutVerifier, VerifyConfig};
//!
//! let layout = SignedMetadata::load("root.layout")?;
//! let keys = BTreeMap::from([(owner.key_id().to_string(), owner)]);
//! let summary = LayoutVerifier::new(VerifyConfig::default()).verify(&layout, &keys)?;
//! for warning in summary.warnings() {
//!     eprintln!("{}", warning);
//! }
//! ```

mod config;
mod inspection;
mod report;
mod sources;

pub use config::VerifyConfig;
pub use inspection::{InspectionRunner, ProcessInspectionRunner};
pub use report::{Enforcement, Finding, VerificationSummary};
pub use sources::{LinkDirectory, LinkSource, MemoryLinkSource};

use crate::certificate::{CertificateIdentity, CertificatePool};
use crate::error::InTotoError;
use crate::models::{Layout, Link, Metadata, SignedMetadata, Step};
use crate::rules::{verify_item_rules, ArtifactType};
use crate::signature::Key;
use crate::time::{SystemTimeSource, TimeSource};

use std::collections::BTreeMap;

const MAX_SUBLAYOUT_DEPTH: usize = 8;

/// Verifies layouts against recorded links.
pub struct LayoutVerifier {
    config: VerifyConfig,
    time_source: Box<dyn TimeSource>,
    link_source: Box<dyn LinkSource>,
    inspection_runner: Box<dyn InspectionRunner>,
}

impl std::fmt::Debug for LayoutVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutVerifier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LayoutVerifier {
    /// Read links from the configured link directory and run inspections in
    /// the current directory, using the system clock.
    pub fn new(config: VerifyConfig) -> Self {
        let link_source = LinkDirectory::new(config.link_dir());
        Self {
            config,
            time_source: Box::new(SystemTimeSource),
            link_source: Box::new(link_source),
            inspection_runner: Box::new(ProcessInspectionRunner::default()),
        }
    }

    pub fn with_time_source(mut self, source: impl TimeSource + 'static) -> Self {
        self.time_source = Box::new(source);
        self
    }

    pub fn with_link_source(mut self, source: impl LinkSource + 'static) -> Self {
        self.link_source = Box::new(source);
        self
    }

    pub fn with_inspection_runner(mut self, runner: impl InspectionRunner + 'static) -> Self {
        self.inspection_runner = Box::new(runner);
        self
    }

    pub fn config(&self) -> &VerifyConfig {
        &self.config
    }

    /// Verify `layout` with the independently trusted `layout_keys`.
    ///
    /// Structural, cryptographic, threshold and expiry failures abort
    /// immediately. Artifact rule violations and strict command mismatches
    /// are collected and returned together as
    /// [`InTotoError::PolicyViolations`].
    pub fn verify(
        &self,
        layout: &SignedMetadata,
        layout_keys: &BTreeMap<String, Key>,
    ) -> Result<VerificationSummary, InTotoError> {
        self.verify_layout(layout, layout_keys, self.link_source.as_ref(), "summary", 0)
    }

    fn verify_layout(
        &self,
        layout: &SignedMetadata,
        layout_keys: &BTreeMap<String, Key>,
        links: &dyn LinkSource,
        summary_name: &str,
        depth: usize,
    ) -> Result<VerificationSummary, InTotoError> {
        let layout_body = match layout.metadata() {
            Metadata::Layout(body) => body,
            Metadata::Link(_) => {
                return Err(InTotoError::InvalidMetadata(
                    "expected layout metadata, found a link".to_string(),
                ))
            }
        };

        self.verify_layout_signatures(layout, layout_keys)?;
        layout_body.validate()?;
        self.verify_expiration(layout_body)?;
        log::info!("Layout signature and expiration verified");

        let pool = certificate_pool(layout_body)?;
        let mut findings = Vec::new();
        let mut step_links = BTreeMap::new();
        for step in &layout_body.steps {
            let verified = self.verify_step_links(layout_body, step, &pool, links)?;
            let resolved = self.resolve_step_links(step, verified, links, depth, &mut findings)?;
            let link = reduce_step_links(step, resolved)?;
            findings.push(self.check_command(step, &link));
            step_links.insert(step.name.clone(), link);
        }
        log::info!("Thresholds met for {} step(s)", step_links.len());

        for step in &layout_body.steps {
            if let Some(link) = step_links.get(&step.name) {
                findings.extend(verify_rules(
                    &step.name,
                    &step.expected_materials,
                    &step.expected_products,
                    link,
                    &step_links,
                )?);
            }
        }
        fail_on_violations(&findings)?;

        let mut context = step_links.clone();
        let mut inspection_links = BTreeMap::new();
        if self.config.run_inspections {
            for inspection in &layout_body.inspect {
                log::info!("Running inspection '{}'", inspection.name);
                let link = self.inspection_runner.run(inspection)?;
                match link.return_value() {
                    Some(0) => {}
                    code => {
                        return Err(InTotoError::InspectionFailed {
                            name: inspection.name.clone(),
                            code: code.unwrap_or(-1),
                        })
                    }
                }
                context.insert(inspection.name.clone(), link.clone());
                inspection_links.insert(inspection.name.clone(), link);
            }
            for inspection in &layout_body.inspect {
                if let Some(link) = inspection_links.get(&inspection.name) {
                    findings.extend(verify_rules(
                        &inspection.name,
                        &inspection.expected_materials,
                        &inspection.expected_products,
                        link,
                        &context,
                    )?);
                }
            }
            fail_on_violations(&findings)?;
        } else if !layout_body.inspect.is_empty() {
            log::warn!("Skipping {} inspection(s)", layout_body.inspect.len());
        }

        let summary_link = summary_link(summary_name, layout_body, &step_links);
        let summary = VerificationSummary {
            step_links,
            inspection_links,
            findings,
            summary_link,
        };
        for warning in summary.warnings() {
            log::warn!("{}", warning);
        }
        log::info!("Verification passed ({} checks)", summary.passed_checks());
        Ok(summary)
    }

    fn verify_layout_signatures(
        &self,
        layout: &SignedMetadata,
        layout_keys: &BTreeMap<String, Key>,
    ) -> Result<(), InTotoError> {
        if layout_keys.is_empty() {
            return Err(InTotoError::UsageError("at least one layout key is required"));
        }
        let mut verified = 0;
        for (keyid, key) in layout_keys {
            match layout.verify_signature(key) {
                Ok(()) => {
                    log::debug!("Layout signature by '{}' verified", keyid);
                    verified += 1;
                }
                Err(e) if self.config.require_all_layout_keys => {
                    return Err(InTotoError::UntrustedLayout(format!("key '{}': {}", keyid, e)));
                }
                Err(e) => log::debug!("Layout signature by '{}' not verified: {}", keyid, e),
            }
        }
        if verified == 0 {
            return Err(InTotoError::UntrustedLayout(format!(
                "none of the {} supplied key(s) verified",
                layout_keys.len()
            )));
        }
        Ok(())
    }

    fn verify_expiration(&self, layout: &Layout) -> Result<(), InTotoError> {
        let expires = layout.expires_at()?;
        if expires < self.time_source.now_utc()? {
            return Err(InTotoError::LayoutExpired(layout.expires.clone()));
        }
        Ok(())
    }

    /// Metadata for `step` carrying a valid signature by an authorized
    /// functionary, keyed by signer key id, together with the signer's key.
    fn verify_step_links(
        &self,
        layout: &Layout,
        step: &Step,
        pool: &CertificatePool,
        links: &dyn LinkSource,
    ) -> Result<BTreeMap<String, (Key, SignedMetadata)>, InTotoError> {
        let mut verified = BTreeMap::new();
        let mut available = 0;

        for keyid in &step.pubkeys {
            let Some(signed) = links.load_link(&step.name, keyid)? else {
                continue;
            };
            available += 1;
            check_step_metadata(step, &signed)?;
            let Some(key) = layout.keys.get(keyid) else {
                log::debug!("Step '{}': key '{}' is not in the layout", step.name, keyid);
                continue;
            };
            match signed.verify_signature(key) {
                Ok(()) => {
                    verified.insert(keyid.clone(), (key.clone(), signed));
                }
                Err(e) => log::debug!("Step '{}': link by '{}' rejected: {}", step.name, keyid, e),
            }
        }

        if !step.cert_constraints.is_empty() {
            let at = self.time_source.now()?;
            for signed in links.step_links(&step.name)? {
                check_step_metadata(step, &signed)?;
                for signature in signed.signatures() {
                    if signature.cert.is_empty() || verified.contains_key(&signature.keyid) {
                        continue;
                    }
                    available += 1;
                    match verify_certificate_signature(step, &signed, &signature.cert, pool, at) {
                        Ok(key) => {
                            verified.insert(key.key_id().to_string(), (key, signed.clone()));
                        }
                        Err(e) => log::debug!(
                            "Step '{}': certificate link by '{}' rejected: {}",
                            step.name,
                            signature.keyid,
                            e
                        ),
                    }
                }
            }
        }

        if verified.len() < step.threshold {
            return Err(InTotoError::ThresholdNotMet {
                step: step.name.clone(),
                required: step.threshold,
                verified: verified.len(),
                available,
            });
        }
        log::debug!("Step '{}': {} of {} link(s) verified", step.name, verified.len(), available);
        Ok(verified)
    }

    /// The link each verified functionary contributed to `step`.
    ///
    /// A sublayout is verified with its signer's key as the only layout key,
    /// against the links recorded under `<step>.<keyid[..8]>`, and
    /// contributes its summary link.
    fn resolve_step_links(
        &self,
        step: &Step,
        verified: BTreeMap<String, (Key, SignedMetadata)>,
        links: &dyn LinkSource,
        depth: usize,
        findings: &mut Vec<Finding>,
    ) -> Result<BTreeMap<String, Link>, InTotoError> {
        let mut resolved = BTreeMap::new();
        for (keyid, (key, signed)) in verified {
            let link = match signed.metadata() {
                Metadata::Link(link) => link.clone(),
                Metadata::Layout(_) => {
                    if depth >= MAX_SUBLAYOUT_DEPTH {
                        return Err(InTotoError::InvalidMetadata(format!(
                            "sublayouts of step '{}' nest deeper than {} levels",
                            step.name, MAX_SUBLAYOUT_DEPTH
                        )));
                    }
                    log::info!("Verifying sublayout of step '{}' signed by '{}'", step.name, keyid);
                    let nested = links.sublayout_links(&step.name, &keyid)?;
                    let keys = BTreeMap::from([(keyid.clone(), key)]);
                    let summary = self.verify_layout(&signed, &keys, nested.as_ref(), &step.name, depth + 1)?;
                    findings.extend(summary.findings);
                    summary.summary_link
                }
            };
            resolved.insert(keyid, link);
        }
        Ok(resolved)
    }

    fn check_command(&self, step: &Step, link: &Link) -> Finding {
        let enforcement = self.config.command_alignment;
        if step.expected_command.is_empty() || step.expected_command == link.command {
            return Finding::pass("step.command", &step.name, enforcement, "command matches");
        }
        Finding::fail(
            "step.command",
            &step.name,
            enforcement,
            "recorded command differs from the expected command",
        )
        .with_details(format!(
            "expected {:?}, got {:?}",
            step.expected_command, link.command
        ))
    }
}

/// A step's metadata is either a link named after the step or a sublayout.
fn check_step_metadata(step: &Step, signed: &SignedMetadata) -> Result<(), InTotoError> {
    match signed.metadata() {
        Metadata::Link(link) if link.name != step.name => Err(InTotoError::InvalidMetadata(format!(
            "link for step '{}' is named '{}'",
            step.name, link.name
        ))),
        _ => Ok(()),
    }
}

fn certificate_pool(layout: &Layout) -> Result<CertificatePool, InTotoError> {
    let mut pool = CertificatePool::new();
    for key in layout.rootcas.values() {
        if let Some(cert) = key.certificate() {
            pool.add_root_pem(cert)?;
        }
    }
    for key in layout.intermediatecas.values() {
        if let Some(cert) = key.certificate() {
            pool.add_intermediate_pem(cert)?;
        }
    }
    Ok(pool)
}

/// Check a certificate-bearing signature and return the signer's key.
fn verify_certificate_signature(
    step: &Step,
    signed: &SignedMetadata,
    cert_pem: &str,
    pool: &CertificatePool,
    at: std::time::SystemTime,
) -> Result<Key, InTotoError> {
    pool.verify(cert_pem, at)?;
    let identity = CertificateIdentity::from_pem(cert_pem)?;
    if !step.cert_constraints.iter().any(|c| c.check(&identity)) {
        return Err(InTotoError::CertificateError(format!(
            "'{}' does not satisfy any constraint",
            identity.common_name
        )));
    }
    let key = Key::from_certificate_pem(cert_pem)?;
    signed.verify_signature(&key)?;
    Ok(key)
}

/// Collapse the verified links of a step into one, requiring them to agree.
fn reduce_step_links(step: &Step, links: BTreeMap<String, Link>) -> Result<Link, InTotoError> {
    let mut iter = links.into_iter();
    let Some((first_keyid, first)) = iter.next() else {
        return Err(InTotoError::InternalError(format!(
            "no verified link for step '{}'",
            step.name
        )));
    };
    for (keyid, link) in iter {
        let field = if link.materials != first.materials {
            "materials"
        } else if link.products != first.products {
            "products"
        } else if link.command != first.command {
            "command"
        } else {
            continue;
        };
        return Err(InTotoError::DivergentLinks {
            step: step.name.clone(),
            first: first_keyid,
            second: keyid,
            field,
        });
    }
    Ok(first)
}

fn verify_rules(
    name: &str,
    material_rules: &[Vec<String>],
    product_rules: &[Vec<String>],
    link: &Link,
    context: &BTreeMap<String, Link>,
) -> Result<Vec<Finding>, InTotoError> {
    let mut findings = Vec::new();
    for (artifact_type, rules, artifacts) in [
        (ArtifactType::Materials, material_rules, &link.materials),
        (ArtifactType::Products, product_rules, &link.products),
    ] {
        let violations = verify_item_rules(name, artifact_type, rules, artifacts, context)?;
        if violations.is_empty() {
            findings.push(Finding::pass(
                format!("artifact_rules.{}", artifact_type),
                name,
                Enforcement::Strict,
                format!("all {} authorized", artifact_type),
            ));
        } else {
            findings.extend(violations);
        }
    }
    Ok(findings)
}

fn fail_on_violations(findings: &[Finding]) -> Result<(), InTotoError> {
    let violations: Vec<Finding> = findings.iter().filter(|f| f.causes_failure()).cloned().collect();
    if violations.is_empty() {
        return Ok(());
    }
    for violation in &violations {
        log::info!("{}", violation);
    }
    Err(InTotoError::PolicyViolations(violations))
}

fn summary_link(name: &str, layout: &Layout, step_links: &BTreeMap<String, Link>) -> Link {
    let mut summary = Link::new(name);
    let first = layout.steps.first().and_then(|s| step_links.get(&s.name));
    let last = layout.steps.last().and_then(|s| step_links.get(&s.name));
    if let Some(first) = first {
        summary.materials = first.materials.clone();
    }
    if let Some(last) = last {
        summary.products = last.products.clone();
        summary.byproducts = last.byproducts.clone();
        summary.command = last.command.clone();
    }
    summary
}
