//! End-to-end verification of supply chains recorded on disk
//!
//! Each test lays out a small project in a temporary directory, records links
//! for its steps the way functionaries would, writes them into a link
//! directory and verifies the signed layout against them.

use intoto::models::{
    inspection_link_file_name, link_file_name, sublayout_link_dir, Inspection, Layout, Link, SignedMetadata, Step,
};
use intoto::runlib::record_artifacts_in;
use intoto::signature::Key;
use intoto::time::FixedTimeSource;
use intoto::verify::{Enforcement, LayoutVerifier, VerifyConfig};
use intoto::{ErrorKind, InTotoError};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn rule(s: &str) -> Vec<String> {
    s.split_whitespace().map(String::from).collect()
}

struct Project {
    workspace: TempDir,
    links: TempDir,
    owner: Key,
    coder: Key,
    builder: Key,
}

impl Project {
    fn new() -> Self {
        let workspace = tempfile::tempdir().unwrap();
        fs::create_dir(workspace.path().join("src")).unwrap();
        fs::write(workspace.path().join("src").join("main.c"), b"int main() { return 0; }\n").unwrap();
        Project {
            workspace,
            links: tempfile::tempdir().unwrap(),
            owner: Key::generate_ed25519().unwrap(),
            coder: Key::generate_ed25519().unwrap(),
            builder: Key::generate_ecdsa().unwrap(),
        }
    }

    fn ws(&self) -> &Path {
        self.workspace.path()
    }

    fn layout(&self) -> Layout {
        let mut layout = Layout {
            expires: "2100-01-01T00:00:00Z".to_string(),
            readme: "write, build, check".to_string(),
            ..Default::default()
        };
        layout.add_key(&self.coder);
        layout.add_key(&self.builder);

        let mut write = Step::new("write-code");
        write.pubkeys = vec![self.coder.key_id().to_string()];
        write.expected_products = vec![rule("CREATE src/*"), rule("DISALLOW *")];
        layout.steps.push(write);

        let mut build = Step::new("build");
        build.pubkeys = vec![self.builder.key_id().to_string()];
        build.expected_command = rule("cc -o app src/main.c");
        build.expected_materials = vec![rule("MATCH src/* WITH PRODUCTS FROM write-code"), rule("DISALLOW *")];
        build.expected_products = vec![rule("CREATE app"), rule("DISALLOW *")];
        layout.steps.push(build);

        layout
    }

    fn signed_layout(&self, layout: Layout) -> SignedMetadata {
        let mut signed = SignedMetadata::new_metablock(layout);
        signed.sign(&self.owner).unwrap();
        let path = self.ws().join("root.layout");
        signed.dump(&path).unwrap();
        SignedMetadata::load(&path).unwrap()
    }

    fn trusted(&self) -> BTreeMap<String, Key> {
        BTreeMap::from([(self.owner.key_id().to_string(), self.owner.public_only())])
    }

    fn store(&self, link: Link, key: &Key) {
        let mut signed = SignedMetadata::new_metablock(link.clone());
        signed.sign(key).unwrap();
        signed
            .dump(self.links.path().join(link_file_name(&link.name, key.key_id())))
            .unwrap();
    }

    fn record_write_code(&self) {
        let mut link = Link::new("write-code");
        link.products = record_artifacts_in(self.ws(), &["src"], None).unwrap();
        self.store(link, &self.coder);
    }

    fn record_build(&self) {
        let mut link = Link::new("build");
        link.command = rule("cc -o app src/main.c");
        link.materials = record_artifacts_in(self.ws(), &["src"], None).unwrap();
        fs::write(self.ws().join("app"), b"\x7fELF binary").unwrap();
        link.products = record_artifacts_in(self.ws(), &["app"], None).unwrap();
        self.store(link, &self.builder);
    }

    fn config(&self) -> VerifyConfig {
        VerifyConfig {
            link_dir: Some(self.links.path().to_path_buf()),
            ..Default::default()
        }
    }

    fn verifier(&self, config: VerifyConfig) -> LayoutVerifier {
        LayoutVerifier::new(config).with_time_source(FixedTimeSource::from_unix_secs(1_700_000_000))
    }
}

#[test]
fn test_recorded_supply_chain_verifies() {
    let project = Project::new();
    project.record_write_code();
    project.record_build();

    let layout = project.signed_layout(project.layout());
    let summary = project
        .verifier(project.config())
        .verify(&layout, &project.trusted())
        .unwrap();

    assert_eq!(summary.step_links.len(), 2);
    assert_eq!(summary.warnings().count(), 0);
    assert!(summary.summary_link.materials.is_empty());
    assert_eq!(
        summary.summary_link.products.keys().collect::<Vec<_>>(),
        vec!["app"]
    );
    assert_eq!(summary.summary_link.command, rule("cc -o app src/main.c"));
}

#[test]
fn test_tampered_source_is_detected() {
    let project = Project::new();
    project.record_write_code();
    fs::write(project.ws().join("src").join("main.c"), b"int main() { return 1; }\n").unwrap();
    project.record_build();

    let layout = project.signed_layout(project.layout());
    let err = project
        .verifier(project.config())
        .verify(&layout, &project.trusted())
        .unwrap_err();
    assert!(err.is_policy_failure());
    let InTotoError::PolicyViolations(violations) = err else {
        panic!("expected policy violations");
    };
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].subject, "build");
    assert_eq!(violations[0].check, "artifact_rules.disallow");
    assert_eq!(violations[0].details.as_deref(), Some("src/main.c"));
}

#[test]
fn test_missing_step_link() {
    let project = Project::new();
    project.record_write_code();

    let layout = project.signed_layout(project.layout());
    let err = project
        .verifier(project.config())
        .verify(&layout, &project.trusted())
        .unwrap_err();
    assert!(matches!(err, InTotoError::ThresholdNotMet { ref step, .. } if step == "build"));
}

#[test]
fn test_malformed_link_is_fatal() {
    let project = Project::new();
    project.record_write_code();
    fs::write(
        project.links.path().join(link_file_name("build", project.builder.key_id())),
        b"{\"signed\": {\"_type\": \"link\"",
    )
    .unwrap();

    let layout = project.signed_layout(project.layout());
    let err = project
        .verifier(project.config())
        .verify(&layout, &project.trusted())
        .unwrap_err();
    assert!(!err.is_policy_failure());
    assert_eq!(err.kind(), ErrorKind::Structural);
}

#[test]
fn test_command_drift_from_config_file() {
    let project = Project::new();
    project.record_write_code();
    project.record_build();

    let mut layout = project.layout();
    layout.steps[1].expected_command = rule("cc -O2 -o app src/main.c");
    let layout = project.signed_layout(layout);

    let summary = project
        .verifier(project.config())
        .verify(&layout, &project.trusted())
        .unwrap();
    assert_eq!(summary.warnings().count(), 1);

    let config_path = project.ws().join("verify.toml");
    fs::write(
        &config_path,
        format!(
            "command_alignment = \"strict\"\nlink_dir = {:?}\n",
            project.links.path().to_string_lossy()
        ),
    )
    .unwrap();
    let config = VerifyConfig::from_toml_file(&config_path).unwrap();
    assert_eq!(config.command_alignment, Enforcement::Strict);
    let err = project.verifier(config).verify(&layout, &project.trusted()).unwrap_err();
    assert!(matches!(err, InTotoError::PolicyViolations(_)));
}

#[test]
fn test_expired_layout_is_rejected() {
    let project = Project::new();
    project.record_write_code();
    project.record_build();

    let mut layout = project.layout();
    layout.expires = "2020-01-01T00:00:00Z".to_string();
    let layout = project.signed_layout(layout);

    let err = project
        .verifier(project.config())
        .verify(&layout, &project.trusted())
        .unwrap_err();
    assert!(matches!(err, InTotoError::LayoutExpired(ref expires) if expires == "2020-01-01T00:00:00Z"));
}

#[test]
fn test_layout_signed_by_functionary_is_untrusted() {
    let project = Project::new();
    project.record_write_code();
    project.record_build();

    let mut signed = SignedMetadata::new_metablock(project.layout());
    signed.sign(&project.coder).unwrap();
    let err = project
        .verifier(project.config())
        .verify(&signed, &project.trusted())
        .unwrap_err();
    assert!(matches!(err, InTotoError::UntrustedLayout(_)));
    assert_eq!(err.kind(), ErrorKind::Crypto);
}

#[test]
fn test_envelope_links_and_layout() {
    let project = Project::new();

    let mut link = Link::new("write-code");
    link.products = record_artifacts_in(project.ws(), &["src"], None).unwrap();
    let mut signed = SignedMetadata::new_envelope(link).unwrap();
    signed.sign(&project.coder).unwrap();
    signed
        .dump(project.links.path().join(link_file_name("write-code", project.coder.key_id())))
        .unwrap();
    project.record_build();

    let mut layout = SignedMetadata::new_envelope(project.layout()).unwrap();
    layout.sign(&project.owner).unwrap();
    let path = project.ws().join("root.layout");
    layout.dump(&path).unwrap();
    let layout = SignedMetadata::load(&path).unwrap();
    assert!(layout.is_envelope());

    project
        .verifier(project.config())
        .verify(&layout, &project.trusted())
        .unwrap();
}

#[test]
fn test_build_delegated_to_sublayout() {
    let project = Project::new();
    project.record_write_code();

    // The builder delegates the build step to the coder through a sublayout.
    let mut sublayout = Layout {
        expires: "2100-01-01T00:00:00Z".to_string(),
        ..Default::default()
    };
    sublayout.add_key(&project.coder);
    let mut compile = Step::new("compile");
    compile.pubkeys = vec![project.coder.key_id().to_string()];
    compile.expected_materials = vec![rule("ALLOW src/*"), rule("DISALLOW *")];
    compile.expected_products = vec![rule("CREATE app"), rule("DISALLOW *")];
    sublayout.steps.push(compile);
    let mut signed = SignedMetadata::new_metablock(sublayout);
    signed.sign(&project.builder).unwrap();
    signed
        .dump(project.links.path().join(link_file_name("build", project.builder.key_id())))
        .unwrap();

    let mut link = Link::new("compile");
    link.command = rule("cc -o app src/main.c");
    link.materials = record_artifacts_in(project.ws(), &["src"], None).unwrap();
    fs::write(project.ws().join("app"), b"\x7fELF binary").unwrap();
    link.products = record_artifacts_in(project.ws(), &["app"], None).unwrap();
    let mut signed = SignedMetadata::new_metablock(link);
    signed.sign(&project.coder).unwrap();
    let nested = project
        .links
        .path()
        .join(sublayout_link_dir("build", project.builder.key_id()));
    fs::create_dir(&nested).unwrap();
    signed
        .dump(nested.join(link_file_name("compile", project.coder.key_id())))
        .unwrap();

    let layout = project.signed_layout(project.layout());
    let summary = project
        .verifier(project.config())
        .verify(&layout, &project.trusted())
        .unwrap();
    assert_eq!(summary.step_links["build"].name, "build");
    assert_eq!(summary.summary_link.command, rule("cc -o app src/main.c"));

    // A compile link that no longer matches the sources fails the build step.
    fs::write(project.ws().join("src").join("main.c"), b"int main() { return 1; }\n").unwrap();
    let mut link = Link::new("compile");
    link.command = rule("cc -o app src/main.c");
    link.materials = record_artifacts_in(project.ws(), &["src"], None).unwrap();
    link.products = record_artifacts_in(project.ws(), &["app"], None).unwrap();
    let mut signed = SignedMetadata::new_metablock(link);
    signed.sign(&project.coder).unwrap();
    signed
        .dump(nested.join(link_file_name("compile", project.coder.key_id())))
        .unwrap();
    let err = project
        .verifier(project.config())
        .verify(&layout, &project.trusted())
        .unwrap_err();
    let InTotoError::PolicyViolations(violations) = err else {
        panic!("expected policy violations");
    };
    assert_eq!(violations[0].subject, "build");
}

#[cfg(unix)]
#[test]
fn test_inspection_runs_in_workspace() {
    use intoto::verify::ProcessInspectionRunner;

    let project = Project::new();
    project.record_write_code();
    project.record_build();

    let mut layout = project.layout();
    let mut check = Inspection::new("check-app", rule("test -f app"));
    check.expected_materials = vec![
        rule("MATCH app WITH PRODUCTS FROM build"),
        rule("MATCH src/* WITH PRODUCTS FROM write-code"),
        rule("ALLOW root.layout"),
        rule("DISALLOW *"),
    ];
    check.expected_products = vec![rule("ALLOW *"), rule("ALLOW src/*")];
    layout.inspect.push(check);
    let layout = project.signed_layout(layout);

    let summary = project
        .verifier(project.config())
        .with_inspection_runner(ProcessInspectionRunner::new(project.ws()))
        .verify(&layout, &project.trusted())
        .unwrap();
    assert_eq!(summary.inspection_links["check-app"].return_value(), Some(0));
    let saved = SignedMetadata::load(project.ws().join(inspection_link_file_name("check-app"))).unwrap();
    assert_eq!(saved.metadata().as_link().unwrap().name, "check-app");

    // The same inspection fails once the binary is gone.
    fs::remove_file(project.ws().join("app")).unwrap();
    let err = project
        .verifier(project.config())
        .with_inspection_runner(ProcessInspectionRunner::new(project.ws()))
        .verify(&layout, &project.trusted())
        .unwrap_err();
    assert!(matches!(err, InTotoError::InspectionFailed { ref name, code: 1 } if name == "check-app"));
}
