//! Compile-time builtin plugin gallery (spec §4.H, REDESIGN FLAG #1).
//!
//! Replaces the source's runtime directory-scan-for-`DEFINITION`-modules
//! pattern with an explicit static table built at program start. Ships one
//! real entry (`ai-fast-api`, the bundled Auto-Rotate plugin, §K) plus a
//! trivial `counter-template` demo used to exercise install → launch →
//! URL-confirmation without an LLM key (spec §8 scenarios 1-2).

use crate::install_source::InstallSource;

#[derive(Debug, Clone)]
pub struct BuiltinPlugin {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

impl BuiltinPlugin {
    pub fn install_source(&self) -> InstallSource {
        match self.id {
            "ai-fast-api" => InstallSource::Inline(AI_FAST_API_FILES.to_vec()),
            "counter-template" => InstallSource::Inline(COUNTER_TEMPLATE_FILES.to_vec()),
            other => unreachable!("no install source registered for gallery id {other}"),
        }
    }
}

const COUNTER_TEMPLATE_MANIFEST: &str = r#"{
  "id": "counter-template",
  "name": "Counter Template",
  "start_cmd": "./start.sh",
  "port": 8000,
  "requires": []
}"#;

const COUNTER_TEMPLATE_START_SH: &str = "#!/bin/sh\nexec node server.js\n";

const COUNTER_TEMPLATE_SERVER_JS: &str = r#"const http = require('http');
let count = 0;
http.createServer((req, res) => {
  if (req.url === '/health') { res.end('ok'); return; }
  count += 1;
  res.end(`count: ${count}`);
}).listen(process.env.PORT || 8000);
"#;

static COUNTER_TEMPLATE_FILES: &[(&str, &[u8])] = &[
    ("pocketpaw.json", COUNTER_TEMPLATE_MANIFEST.as_bytes()),
    ("start.sh", COUNTER_TEMPLATE_START_SH.as_bytes()),
    ("server.js", COUNTER_TEMPLATE_SERVER_JS.as_bytes()),
];

const AI_FAST_API_MANIFEST: &str = r#"{
  "id": "ai-fast-api",
  "name": "AI Fast API",
  "start_cmd": "./start.sh",
  "port": 8787,
  "requires": []
}"#;

const AI_FAST_API_START_SH: &str = "#!/bin/sh\nexec ai-fast-api\n";

static AI_FAST_API_FILES: &[(&str, &[u8])] = &[
    ("pocketpaw.json", AI_FAST_API_MANIFEST.as_bytes()),
    ("start.sh", AI_FAST_API_START_SH.as_bytes()),
];

/// The builtin gallery, resolved at program start rather than by scanning
/// a directory for dynamically-loaded modules.
pub fn builtin_gallery() -> &'static [BuiltinPlugin] {
    &[
        BuiltinPlugin {
            id: "ai-fast-api",
            name: "AI Fast API",
            description: "Bundled Auto-Rotate LLM service exposing an OpenAI-compatible endpoint.",
        },
        BuiltinPlugin {
            id: "counter-template",
            name: "Counter Template",
            description: "Minimal HTTP counter demo plugin with no LLM dependency.",
        },
    ]
}

pub fn find_builtin(id: &str) -> Option<&'static BuiltinPlugin> {
    builtin_gallery().iter().find(|p| p.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gallery_has_exactly_the_two_documented_entries() {
        let ids: Vec<&str> = builtin_gallery().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["ai-fast-api", "counter-template"]);
    }

    #[test]
    fn find_builtin_is_case_sensitive_exact_match() {
        assert!(find_builtin("counter-template").is_some());
        assert!(find_builtin("Counter-Template").is_none());
    }
}
