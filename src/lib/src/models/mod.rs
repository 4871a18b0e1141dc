//! Link and layout metadata, and the signed containers that carry them.

mod layout;
mod link;
mod metablock;

pub use layout::*;
pub use link::*;
pub use metablock::*;

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Hash algorithm name to hex digest, e.g. `{"sha256": "ab12..."}`.
pub type DigestSet = BTreeMap<String, String>;

/// Artifact path to digest set.
pub type ArtifactMap = BTreeMap<String, DigestSet>;

/// The payload of a signed container.
///
/// The variant is carried on the wire as the `_type` field of the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "lowercase")]
pub enum Metadata {
    Link(Link),
    Layout(Layout),
}

impl Metadata {
    pub fn type_name(&self) -> &'static str {
        match self {
            Metadata::Link(_) => "link",
            Metadata::Layout(_) => "layout",
        }
    }

    pub fn as_link(&self) -> Option<&Link> {
        match self {
            Metadata::Link(link) => Some(link),
            Metadata::Layout(_) => None,
        }
    }

    pub fn as_layout(&self) -> Option<&Layout> {
        match self {
            Metadata::Layout(layout) => Some(layout),
            Metadata::Link(_) => None,
        }
    }

    /// Check the structural invariants of the payload.
    pub fn validate(&self) -> Result<(), crate::InTotoError> {
        match self {
            Metadata::Link(link) => link.validate(),
            Metadata::Layout(layout) => layout.validate(),
        }
    }
}

impl From<Link> for Metadata {
    fn from(link: Link) -> Self {
        Metadata::Link(link)
    }
}

impl From<Layout> for Metadata {
    fn from(layout: Layout) -> Self {
        Metadata::Layout(layout)
    }
}

pub(crate) fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Deserialize `null` as the type's default, for collections that other
/// implementations write as `null` when empty.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
