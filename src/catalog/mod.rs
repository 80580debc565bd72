//! Module catalog
//!
//! Read-only table of processing modules. Each module names at most one parent
//! whose output stem it consumes, so the dependency relation is a forest.

mod builtin;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::core::errors::CatalogError;

pub type ModuleId = String;
pub type StemKey = String;

/// Definition of a single processing module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub id: ModuleId,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    /// Opaque model reference handed to the executor
    pub model: String,
    #[serde(default)]
    pub depends_on: Option<ModuleId>,
    /// Stem of the parent's outputs used as this module's input
    #[serde(default)]
    pub input_stem: Option<StemKey>,
    /// Stem key -> output file stem (no extension)
    pub output_names: BTreeMap<StemKey, String>,
}

fn default_category() -> String {
    "Uncategorized".to_string()
}

impl ModuleDefinition {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            category: default_category(),
            model: model.into(),
            depends_on: None,
            input_stem: None,
            output_names: BTreeMap::new(),
        }
    }

    pub fn with_dependency(
        mut self,
        parent: impl Into<String>,
        input_stem: impl Into<String>,
    ) -> Self {
        self.depends_on = Some(parent.into());
        self.input_stem = Some(input_stem.into());
        self
    }

    pub fn with_output(mut self, stem: impl Into<String>, file_stem: impl Into<String>) -> Self {
        self.output_names.insert(stem.into(), file_stem.into());
        self
    }

    pub fn with_description(
        mut self,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.category = category.into();
        self.description = description.into();
        self
    }

    pub fn is_root(&self) -> bool {
        self.depends_on.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    modules: Vec<ModuleDefinition>,
}

/// Validated, immutable set of module definitions
#[derive(Debug, Clone)]
pub struct Catalog {
    modules: Vec<ModuleDefinition>,
    index: HashMap<ModuleId, usize>,
}

impl Catalog {
    /// Builds a catalog, rejecting duplicate ids, dangling parents, stem
    /// mismatches and cycles.
    pub fn from_definitions(modules: Vec<ModuleDefinition>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(modules.len());
        for (position, module) in modules.iter().enumerate() {
            if index.insert(module.id.clone(), position).is_some() {
                return Err(CatalogError::DuplicateModule(module.id.clone()));
            }
        }

        for module in &modules {
            match (&module.depends_on, &module.input_stem) {
                (None, None) => {}
                (Some(parent), Some(stem)) => {
                    let parent_def = index.get(parent).map(|&i| &modules[i]).ok_or_else(|| {
                        CatalogError::DanglingDependency {
                            module: module.id.clone(),
                            depends_on: parent.clone(),
                        }
                    })?;
                    if !parent_def.output_names.contains_key(stem) {
                        return Err(CatalogError::UndeclaredInputStem {
                            module: module.id.clone(),
                            parent: parent.clone(),
                            stem: stem.clone(),
                        });
                    }
                }
                _ => return Err(CatalogError::InputStemMismatch(module.id.clone())),
            }
        }

        let catalog = Self { modules, index };
        catalog.validate_acyclic()?;
        Ok(catalog)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_yaml::from_str(yaml)?;
        Self::from_definitions(file.modules)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, CatalogError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_yaml_str(&yaml)?;
        info!("Loaded {} modules from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// The audio separation modules shipped with stemflow
    pub fn builtin() -> Self {
        Self::from_definitions(builtin::definitions())
            .unwrap_or_else(|e| unreachable!("built-in catalog is invalid: {e}"))
    }

    fn validate_acyclic(&self) -> Result<(), CatalogError> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let nodes: HashMap<&str, NodeIndex> = self
            .modules
            .iter()
            .map(|m| (m.id.as_str(), graph.add_node(m.id.as_str())))
            .collect();
        for module in &self.modules {
            if let Some(parent) = &module.depends_on {
                graph.add_edge(nodes[parent.as_str()], nodes[module.id.as_str()], ());
            }
        }
        if is_cyclic_directed(&graph) {
            return Err(CatalogError::Cycle);
        }
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Option<&ModuleDefinition> {
        self.index.get(id).map(|&i| &self.modules[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the ids that are not present in the catalog, in request order
    pub fn validate<S: AsRef<str>>(&self, ids: &[S]) -> Vec<String> {
        ids.iter()
            .map(AsRef::as_ref)
            .filter(|id| !self.contains(id))
            .map(str::to_string)
            .collect()
    }

    /// Root ancestor first, `id` last. Empty when `id` is unknown.
    pub fn dependency_chain(&self, id: &str) -> Vec<ModuleId> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.lookup(id);
        while let Some(module) = current {
            if !seen.insert(module.id.as_str()) {
                break;
            }
            chain.push(module.id.clone());
            current = module.depends_on.as_deref().and_then(|parent| self.lookup(parent));
        }
        chain.reverse();
        chain
    }

    /// Definitions in declaration order
    pub fn list(&self) -> &[ModuleDefinition] {
        &self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn small_catalog() -> Catalog {
        Catalog::from_definitions(vec![
            ModuleDefinition::new("root", "root.ckpt")
                .with_output("X", "outX")
                .with_output("Y", "outY"),
            ModuleDefinition::new("child", "child.ckpt")
                .with_dependency("root", "X")
                .with_output("Z", "outZ"),
            ModuleDefinition::new("grandchild", "gc.ckpt")
                .with_dependency("child", "Z")
                .with_output("W", "outW"),
        ])
        .unwrap()
    }

    #[test]
    fn test_dependency_chain_root_first() {
        let catalog = small_catalog();
        assert_eq!(catalog.dependency_chain("grandchild"), vec!["root", "child", "grandchild"]);
        assert_eq!(catalog.dependency_chain("root"), vec!["root"]);
        assert!(catalog.dependency_chain("missing").is_empty());
    }

    #[test]
    fn test_validate_returns_unknown_ids() {
        let catalog = small_catalog();
        assert_eq!(catalog.validate(&["root", "nope", "child", "other"]), vec!["nope", "other"]);
        assert!(catalog.validate(&["root"]).is_empty());
    }

    #[test]
    fn test_rejects_dangling_dependency() {
        let err = Catalog::from_definitions(vec![ModuleDefinition::new("a", "m")
            .with_dependency("ghost", "X")
            .with_output("Y", "y")])
        .unwrap_err();
        assert!(matches!(err, CatalogError::DanglingDependency { .. }));
    }

    #[test]
    fn test_rejects_input_stem_without_parent() {
        let mut module = ModuleDefinition::new("a", "m").with_output("Y", "y");
        module.input_stem = Some("X".into());
        let err = Catalog::from_definitions(vec![module]).unwrap_err();
        assert!(matches!(err, CatalogError::InputStemMismatch(_)));
    }

    #[test]
    fn test_rejects_undeclared_parent_stem() {
        let err = Catalog::from_definitions(vec![
            ModuleDefinition::new("a", "m").with_output("X", "x"),
            ModuleDefinition::new("b", "m").with_dependency("a", "Q").with_output("Y", "y"),
        ])
        .unwrap_err();
        assert!(matches!(err, CatalogError::UndeclaredInputStem { .. }));
    }

    #[test]
    fn test_rejects_cycle() {
        let err = Catalog::from_definitions(vec![
            ModuleDefinition::new("a", "m").with_dependency("b", "Y").with_output("X", "x"),
            ModuleDefinition::new("b", "m").with_dependency("a", "X").with_output("Y", "y"),
        ])
        .unwrap_err();
        assert!(matches!(err, CatalogError::Cycle));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = Catalog::from_definitions(vec![
            ModuleDefinition::new("a", "m").with_output("X", "x"),
            ModuleDefinition::new("a", "n").with_output("X", "x"),
        ])
        .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateModule(id) if id == "a"));
    }

    #[test]
    fn test_yaml_catalog() {
        let yaml = r#"
modules:
  - id: root
    model: root.ckpt
    output_names:
      X: outX
  - id: child
    model: child.ckpt
    category: Vocal Processing
    depends_on: root
    input_stem: X
    output_names:
      Z: outZ
"#;
        let catalog = Catalog::from_yaml_str(yaml).unwrap();
        assert_eq!(catalog.len(), 2);
        let child = catalog.lookup("child").unwrap();
        assert_eq!(child.depends_on.as_deref(), Some("root"));
        assert_eq!(child.category, "Vocal Processing");
        assert_eq!(catalog.lookup("root").unwrap().category, "Uncategorized");
        assert_eq!(catalog.list()[0].id, "root");
    }

    #[test]
    fn test_builtin_catalog() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.len(), 5);
        assert_eq!(
            catalog.dependency_chain("lead_backing"),
            vec!["vocal_instrumental", "lead_backing"]
        );
        assert!(catalog.lookup("htdemucs_6s").unwrap().is_root());
    }
}
