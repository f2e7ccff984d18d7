//! Long-term facts feed for the Context Builder (spec §4.C). The spec
//! leaves the facts store's persistence format unspecified (§1
//! Non-goals); this reads a flat JSON array of strings sitting next to
//! the memory store, tolerating a missing or malformed file the same way
//! `MemoryStore` tolerates a fresh, empty data directory.

use std::path::Path;

use pocketpaw_context::Fact;

pub fn load_facts(path: &Path) -> Vec<Fact> {
    let Ok(raw) = std::fs::read_to_string(path) else { return Vec::new() };
    let Ok(values) = serde_json::from_str::<Vec<String>>(&raw) else {
        tracing::warn!(path = %path.display(), "facts file is not a JSON array of strings, ignoring");
        return Vec::new();
    };
    values.into_iter().map(|text| Fact { text }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_no_facts() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_facts(&dir.path().join("facts.json")).is_empty());
    }

    #[test]
    fn malformed_file_yields_no_facts_instead_of_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.json");
        std::fs::write(&path, "{\"not\": \"an array\"}").unwrap();
        assert!(load_facts(&path).is_empty());
    }

    #[test]
    fn loads_flat_string_array_as_facts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.json");
        std::fs::write(&path, r#"["likes short replies", "owner is on UTC+2"]"#).unwrap();
        let facts = load_facts(&path);
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].text, "likes short replies");
        assert_eq!(facts[1].text, "owner is on UTC+2");
    }
}
