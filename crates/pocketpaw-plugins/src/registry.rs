//! Plugin Registry (spec §4.H): reads on-disk manifests, never touches
//! process state itself (that's the Supervisor's job).

use std::path::{Path, PathBuf};

use pocketpaw_domain::plugin::PluginManifest;

#[derive(Debug, Clone)]
pub struct PluginEntry {
    pub manifest: PluginManifest,
    pub dir: PathBuf,
}

pub struct PluginRegistry {
    plugins_dir: PathBuf,
}

impl PluginRegistry {
    pub fn new(plugins_dir: impl Into<PathBuf>) -> Self {
        Self { plugins_dir: plugins_dir.into() }
    }

    pub fn plugin_dir(&self, id: &str) -> PathBuf {
        self.plugins_dir.join(id)
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Scans `<plugins_dir>/*`, parsing `pocketpaw.json` in each
    /// subdirectory. Entries without a manifest, with invalid JSON, or
    /// whose `id` doesn't match the directory name are skipped rather than
    /// surfaced as an error -- a malformed sibling plugin must never stop
    /// the whole list from rendering.
    pub fn list_plugins(&self) -> Vec<PluginEntry> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&self.plugins_dir) {
            Ok(e) => e,
            Err(_) => return out,
        };

        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let Some(dir_name) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let manifest_path = dir.join("pocketpaw.json");
            let Ok(raw) = std::fs::read_to_string(&manifest_path) else {
                continue;
            };
            let Ok(manifest) = serde_json::from_str::<PluginManifest>(&raw) else {
                continue;
            };
            if manifest.validate(dir_name).is_err() {
                continue;
            }
            out.push(PluginEntry { manifest, dir });
        }

        out.sort_by(|a, b| a.manifest.id.cmp(&b.manifest.id));
        out
    }

    pub fn get_plugin(&self, id: &str) -> Option<PluginEntry> {
        self.list_plugins().into_iter().find(|p| p.manifest.id == id)
    }

    pub fn is_installed(&self, id: &str) -> bool {
        self.plugin_dir(id).join("pocketpaw.json").exists()
    }

    /// Every manifest port currently registered, used by the Supervisor's
    /// shared-port disambiguation (spec §4.I / §9 Open Question).
    pub fn ports_by_plugin(&self) -> Vec<(String, u16)> {
        self.list_plugins()
            .into_iter()
            .filter_map(|p| p.manifest.port.map(|port| (p.manifest.id, port)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, id: &str, port: Option<u16>) {
        std::fs::create_dir_all(dir).unwrap();
        let manifest = PluginManifest {
            id: id.to_string(),
            name: id.to_string(),
            start_cmd: "./start.sh".into(),
            install_cmd: None,
            stop_cmd: None,
            port,
            env: Default::default(),
            requires: Vec::new(),
            openapi_path: None,
            web_view: false,
            web_view_path: None,
        };
        std::fs::write(dir.join("pocketpaw.json"), serde_json::to_vec(&manifest).unwrap()).unwrap();
    }

    #[test]
    fn list_plugins_skips_directories_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("no-manifest")).unwrap();
        write_manifest(&dir.path().join("demo"), "demo", Some(8000));

        let registry = PluginRegistry::new(dir.path());
        let plugins = registry.list_plugins();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].manifest.id, "demo");
    }

    #[test]
    fn list_plugins_skips_id_directory_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(&dir.path().join("demo"), "different-id", None);

        let registry = PluginRegistry::new(dir.path());
        assert!(registry.list_plugins().is_empty());
    }

    #[test]
    fn ports_by_plugin_omits_portless_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(&dir.path().join("demo"), "demo", Some(8000));
        write_manifest(&dir.path().join("noport"), "noport", None);

        let registry = PluginRegistry::new(dir.path());
        let ports = registry.ports_by_plugin();
        assert_eq!(ports, vec![("demo".to_string(), 8000)]);
    }
}
