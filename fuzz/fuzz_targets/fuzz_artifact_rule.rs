//! Fuzz target for artifact rule compilation and glob matching

#![no_main]

use intoto::rules::{ArtifactRule, Glob};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let tokens: Vec<String> = text.split_whitespace().map(String::from).collect();
    if let Ok(rule) = ArtifactRule::parse(&tokens) {
        // The canonical rendering must compile to the same rule
        let rendered: Vec<String> = rule.to_string().split_whitespace().map(String::from).collect();
        let reparsed = ArtifactRule::parse(&rendered).expect("reparse");
        assert_eq!(reparsed.to_string(), rule.to_string());
    }

    // First line is the pattern, the rest are candidate paths
    let mut lines = text.lines();
    if let Some(Ok(glob)) = lines.next().map(Glob::new) {
        for path in lines {
            let _ = glob.is_match(path);
        }
    }
});
