use crate::error::InTotoError;
use crate::models::{link_file_name, sublayout_link_dir, SignedMetadata};

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where the verifier finds the links functionaries recorded.
pub trait LinkSource {
    /// The link recorded for `step` by the functionary with key `keyid`, or
    /// `None` if there is none. A link that exists but does not parse is an
    /// error.
    fn load_link(&self, step: &str, keyid: &str) -> Result<Option<SignedMetadata>, InTotoError>;

    /// Every link recorded for `step`, whoever signed it.
    fn step_links(&self, step: &str) -> Result<Vec<SignedMetadata>, InTotoError>;

    /// The links of the sublayout the functionary with key `keyid` signed in
    /// place of a `step` link.
    fn sublayout_links(&self, step: &str, keyid: &str) -> Result<Box<dyn LinkSource>, InTotoError>;
}

/// Links stored as `<step>.<keyid[..8]>.link` files in a directory.
#[derive(Debug, Clone)]
pub struct LinkDirectory {
    dir: PathBuf,
}

impl LinkDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Returns true if `file_name` has the shape `<step>.<prefix>.link`.
fn is_step_link_file(file_name: &str, step: &str) -> bool {
    file_name
        .strip_prefix(step)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(".link"))
        .is_some_and(|prefix| !prefix.is_empty() && !prefix.contains('.'))
}

impl LinkSource for LinkDirectory {
    fn load_link(&self, step: &str, keyid: &str) -> Result<Option<SignedMetadata>, InTotoError> {
        let path = self.dir.join(link_file_name(step, keyid));
        match fs::read(&path) {
            Ok(bytes) => {
                log::debug!("Loaded link {}", path.display());
                SignedMetadata::from_slice(&bytes).map(Some)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No link at {}", path.display());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn step_links(&self, step: &str) -> Result<Vec<SignedMetadata>, InTotoError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if is_step_link_file(name, step) {
                    paths.push(entry.path());
                }
            }
        }
        paths.sort();
        paths.iter().map(SignedMetadata::load).collect()
    }

    fn sublayout_links(&self, step: &str, keyid: &str) -> Result<Box<dyn LinkSource>, InTotoError> {
        let dir = self.dir.join(sublayout_link_dir(step, keyid));
        log::debug!("Sublayout links of step '{}' read from {}", step, dir.display());
        Ok(Box::new(LinkDirectory::new(dir)))
    }
}

/// Links held in memory, keyed like their file names.
#[derive(Debug, Clone, Default)]
pub struct MemoryLinkSource {
    links: BTreeMap<String, SignedMetadata>,
    sublayouts: BTreeMap<String, MemoryLinkSource>,
}

impl MemoryLinkSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, step: &str, keyid: &str, link: SignedMetadata) {
        self.links.insert(link_file_name(step, keyid), link);
    }

    /// Set the links of the sublayout `keyid` signed for `step`.
    pub fn insert_sublayout(&mut self, step: &str, keyid: &str, links: MemoryLinkSource) {
        self.sublayouts.insert(sublayout_link_dir(step, keyid), links);
    }
}

impl LinkSource for MemoryLinkSource {
    fn load_link(&self, step: &str, keyid: &str) -> Result<Option<SignedMetadata>, InTotoError> {
        Ok(self.links.get(&link_file_name(step, keyid)).cloned())
    }

    fn step_links(&self, step: &str) -> Result<Vec<SignedMetadata>, InTotoError> {
        Ok(self
            .links
            .iter()
            .filter(|(name, _)| is_step_link_file(name, step))
            .map(|(_, link)| link.clone())
            .collect())
    }

    fn sublayout_links(&self, step: &str, keyid: &str) -> Result<Box<dyn LinkSource>, InTotoError> {
        let links = self
            .sublayouts
            .get(&sublayout_link_dir(step, keyid))
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(links))
    }
}
