use crate::error::InTotoError;
use crate::models::{inspection_link_file_name, Inspection, Link, SignedMetadata};
use crate::runlib::{record_artifacts_in, run_command};

use std::path::PathBuf;

/// Executes an inspection and reports what it did as an unsigned link.
pub trait InspectionRunner {
    fn run(&self, inspection: &Inspection) -> Result<Link, InTotoError>;
}

/// Runs inspections as child processes in a working directory, recording the
/// whole directory as materials before and as products after the command.
///
/// The unsigned link of each inspection is left in the directory as
/// `<name>.link`.
#[derive(Debug, Clone)]
pub struct ProcessInspectionRunner {
    dir: PathBuf,
}

impl ProcessInspectionRunner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Default for ProcessInspectionRunner {
    fn default() -> Self {
        Self::new(".")
    }
}

impl InspectionRunner for ProcessInspectionRunner {
    fn run(&self, inspection: &Inspection) -> Result<Link, InTotoError> {
        let mut link = Link::new(&inspection.name);
        link.materials = record_artifacts_in(&self.dir, &["."], None)?;
        link.byproducts = run_command(&inspection.run, Some(&self.dir))?;
        link.command = inspection.run.clone();
        link.products = record_artifacts_in(&self.dir, &["."], None)?;

        let path = self.dir.join(inspection_link_file_name(&inspection.name));
        SignedMetadata::new_metablock(link.clone()).dump(&path)?;
        log::debug!("Inspection link written to {}", path.display());
        Ok(link)
    }
}
