use super::{is_hex, null_as_default, ArtifactMap};
use crate::error::InTotoError;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Evidence that a step was carried out.
///
/// `byproducts` usually holds `stdout`, `stderr` and `return-value`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Link {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub materials: ArtifactMap,
    #[serde(default, deserialize_with = "null_as_default")]
    pub products: ArtifactMap,
    #[serde(default, deserialize_with = "null_as_default")]
    pub byproducts: BTreeMap<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub command: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub environment: BTreeMap<String, Value>,
}

impl Link {
    pub fn new(name: impl Into<String>) -> Self {
        Link {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The `return-value` byproduct, if it was recorded as an integer.
    pub fn return_value(&self) -> Option<i64> {
        self.byproducts.get("return-value").and_then(Value::as_i64)
    }

    pub fn validate(&self) -> Result<(), InTotoError> {
        for (kind, artifacts) in [("material", &self.materials), ("product", &self.products)] {
            for (path, digests) in artifacts {
                for (algorithm, digest) in digests {
                    if !is_hex(digest) {
                        return Err(InTotoError::InvalidMetadata(format!(
                            "{} '{}' has a non-hex {} digest",
                            kind, path, algorithm
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// File name of a finished link: `<step>.<keyid[..8]>.link`.
pub fn link_file_name(step: &str, keyid: &str) -> String {
    format!("{}.{}.link", step, key_id_prefix(keyid))
}

/// Directory holding the links of a sublayout signed in place of a step
/// link: `<step>.<keyid[..8]>`.
pub fn sublayout_link_dir(step: &str, keyid: &str) -> String {
    format!("{}.{}", step, key_id_prefix(keyid))
}

/// File name of the unsigned link an inspection leaves behind.
pub fn inspection_link_file_name(name: &str) -> String {
    format!("{}.link", name)
}

fn key_id_prefix(keyid: &str) -> String {
    keyid.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    #[test]
    fn test_link_field_names() {
        let mut link = Link::new("build");
        link.command = vec!["make".to_string()];
        let json = serde_json::to_value(Metadata::Link(link)).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["_type", "byproducts", "command", "environment", "materials", "name", "products"]
        );
        assert_eq!(obj["_type"], "link");
    }

    #[test]
    fn test_null_collections_accepted() {
        let link: Link = serde_json::from_str(
            r#"{"name":"x","materials":null,"products":null,"byproducts":null,"command":null,"environment":null}"#,
        )
        .unwrap();
        assert!(link.materials.is_empty());
        assert!(link.command.is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let res: Result<Metadata, _> =
            serde_json::from_str(r#"{"_type":"link","name":"x","materials":{},"extra":1}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_validate_digests() {
        let mut link = Link::new("build");
        link.materials.insert(
            "foo.c".to_string(),
            [("sha256".to_string(), "ab12".to_string())].into_iter().collect(),
        );
        link.validate().unwrap();

        link.products.insert(
            "foo".to_string(),
            [("sha256".to_string(), "not-hex".to_string())].into_iter().collect(),
        );
        assert!(matches!(link.validate(), Err(InTotoError::InvalidMetadata(_))));
    }

    #[test]
    fn test_return_value() {
        let mut link = Link::new("test");
        assert_eq!(link.return_value(), None);
        link.byproducts.insert("return-value".to_string(), Value::from(3));
        assert_eq!(link.return_value(), Some(3));
    }

    #[test]
    fn test_file_names() {
        let keyid = "0123456789abcdef";
        assert_eq!(link_file_name("package", keyid), "package.01234567.link");
        assert_eq!(sublayout_link_dir("package", keyid), "package.01234567");
        assert_eq!(inspection_link_file_name("untar"), "untar.link");
        assert_eq!(link_file_name("short", "ab"), "short.ab.link");
    }
}
