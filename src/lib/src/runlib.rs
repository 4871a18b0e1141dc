//! Recording evidence: hashing artifacts and running commands.

use crate::error::InTotoError;
use crate::models::{ArtifactMap, DigestSet, Link};
use crate::rules::clean_path;

use ct_codecs::{Encoder, Hex};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::Command;

/// Byproduct key of the command's exit code.
pub const RETURN_VALUE: &str = "return-value";

fn hash_file(path: &Path) -> Result<DigestSet, InTotoError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let mut digests = DigestSet::new();
    digests.insert("sha256".to_string(), Hex::encode_to_string(hasher.finalize())?);
    Ok(digests)
}

fn path_key(path: &Path) -> String {
    clean_path(&path.to_string_lossy())
}

fn record_path(base: &Path, rel: &Path, exclude: Option<&Regex>, artifacts: &mut ArtifactMap) -> Result<(), InTotoError> {
    let key = path_key(rel);
    if key != "." && exclude.is_some_and(|re| re.is_match(&key)) {
        log::debug!("Excluding '{}'", key);
        return Ok(());
    }
    let full = base.join(rel);
    let meta = fs::symlink_metadata(&full)?;
    if meta.is_dir() {
        let mut names = fs::read_dir(&full)?
            .map(|e| e.map(|e| e.file_name()))
            .collect::<Result<Vec<_>, _>>()?;
        names.sort();
        for name in names {
            record_path(base, &rel.join(name), exclude, artifacts)?;
        }
    } else if meta.file_type().is_symlink() {
        // Linked files are recorded with the target's content; linked
        // directories are not followed.
        if fs::metadata(&full).map(|m| m.is_file()).unwrap_or(false) {
            artifacts.insert(key, hash_file(&full)?);
        }
    } else if meta.is_file() {
        artifacts.insert(key, hash_file(&full)?);
    }
    Ok(())
}

/// Hash every file found under `paths` with SHA-256.
///
/// Directories are walked recursively. Keys are the cleaned, `/`-separated
/// paths as reached from the given roots, so recording `.` yields `foo` and
/// `dir/bar`. Paths matching `exclude` are skipped, directories included.
pub fn record_artifacts<P: AsRef<Path>>(paths: &[P], exclude: Option<&Regex>) -> Result<ArtifactMap, InTotoError> {
    record_artifacts_in(Path::new(""), paths, exclude)
}

/// Like [`record_artifacts`], with `paths` resolved against `base` and keys
/// kept relative to it.
pub fn record_artifacts_in<P: AsRef<Path>>(
    base: &Path,
    paths: &[P],
    exclude: Option<&Regex>,
) -> Result<ArtifactMap, InTotoError> {
    let mut artifacts = ArtifactMap::new();
    for path in paths {
        record_path(base, path.as_ref(), exclude, &mut artifacts)?;
    }
    Ok(artifacts)
}

/// Run a command and capture `stdout`, `stderr` and `return-value`.
///
/// The return value is -1 if the process was terminated without an exit code.
pub fn run_command(args: &[String], dir: Option<&Path>) -> Result<BTreeMap<String, Value>, InTotoError> {
    let (program, rest) = args
        .split_first()
        .ok_or(InTotoError::UsageError("command must not be empty"))?;
    let mut command = Command::new(program);
    command.args(rest);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    log::debug!("Running {:?}", args);
    let output = command.output()?;

    let mut byproducts = BTreeMap::new();
    byproducts.insert(
        "stdout".to_string(),
        Value::from(String::from_utf8_lossy(&output.stdout).into_owned()),
    );
    byproducts.insert(
        "stderr".to_string(),
        Value::from(String::from_utf8_lossy(&output.stderr).into_owned()),
    );
    byproducts.insert(
        RETURN_VALUE.to_string(),
        Value::from(output.status.code().map(i64::from).unwrap_or(-1)),
    );
    Ok(byproducts)
}

/// Record materials, run `command` (if any), record products, and return the
/// resulting unsigned link.
pub fn in_toto_run<P: AsRef<Path>>(
    name: &str,
    material_paths: &[P],
    product_paths: &[P],
    command: &[String],
    exclude: Option<&Regex>,
) -> Result<Link, InTotoError> {
    let mut link = Link::new(name);
    link.materials = record_artifacts(material_paths, exclude)?;
    if !command.is_empty() {
        link.byproducts = run_command(command, None)?;
        link.command = command.to_vec();
    }
    link.products = record_artifacts(product_paths, exclude)?;
    Ok(link)
}
