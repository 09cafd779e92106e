//! Compiler configuration.
//!
//! The driver builds a [`CompilerConfig`] per invocation. The only
//! tunable today is the set of extern manifests: TOML files describing
//! the functions an external library exports. When at least one
//! manifest is loaded, Sema checks every `extern` block against them,
//! so a typo in an extern prototype fails at compile time instead of at
//! module load time.
//!
//! Manifest format:
//!
//! ```toml
//! [lib]
//! name = "m"
//!
//! [[functions]]
//! name = "sqrt"
//! params = ["int"]
//! return = "int"
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// Extern library manifests to validate `extern` blocks against.
    /// Empty means no validation.
    pub extern_manifests: Vec<ExternManifest>,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_extern_manifest(mut self, manifest: ExternManifest) -> Self {
        self.extern_manifests.push(manifest);
        self
    }

    /// Find the manifest for a library name, if one was loaded.
    pub fn manifest_for(&self, lib_name: &str) -> Option<&ExternManifest> {
        self.extern_manifests
            .iter()
            .find(|m| m.lib.name == lib_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternManifest {
    pub lib: LibInfo,
    #[serde(default)]
    pub functions: Vec<ManifestFunction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibInfo {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestFunction {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(rename = "return", default = "default_return_type")]
    pub returns: String,
}

fn default_return_type() -> String {
    "void".to_string()
}

impl ExternManifest {
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("invalid extern manifest: {}", e))
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("failed to read extern manifest '{}': {}", path.display(), e))?;
        Self::parse(&content)
    }

    pub fn function(&self, name: &str) -> Option<&ManifestFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let manifest = ExternManifest::parse(
            r#"
[lib]
name = "m"

[[functions]]
name = "sqrt"
params = ["int"]
return = "int"

[[functions]]
name = "srand"
params = ["int"]
"#,
        )
        .unwrap();
        assert_eq!(manifest.lib.name, "m");
        assert_eq!(manifest.functions.len(), 2);
        let sqrt = manifest.function("sqrt").unwrap();
        assert_eq!(sqrt.params, vec!["int"]);
        assert_eq!(sqrt.returns, "int");
        // return type defaults to void
        assert_eq!(manifest.function("srand").unwrap().returns, "void");
        assert!(manifest.function("cbrt").is_none());
    }

    #[test]
    fn test_invalid_manifest_is_an_error() {
        assert!(ExternManifest::parse("functions = 3").is_err());
    }
}
