use std::collections::HashMap;
use std::fs;
use std::path::Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::core::error::{Error, Result};
use crate::core::types::type_name;

/// Storage paths behind one external name, tried in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTarget {
    pub primary: String,
    pub fallbacks: Vec<String>,
}

impl AliasTarget {
    pub fn new(primary: impl Into<String>) -> Self {
        AliasTarget {
            primary: primary.into(),
            fallbacks: Vec::new(),
        }
    }

    pub fn with_fallback(mut self, path: impl Into<String>) -> Self {
        self.fallbacks.push(path.into());
        self
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.fallbacks.iter().map(String::as_str))
    }
}

/// External query vocabulary -> storage paths. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct AliasMap {
    aliases: HashMap<String, AliasTarget>,
}

const DEFAULT_ALIASES: &[(&str, &str, Option<&str>)] = &[
    ("task_id", "task_id", None),
    ("energy", "output.final_energy", Some("final_energy")),
    ("energy_per_atom", "output.final_energy_per_atom", Some("final_energy_per_atom")),
    ("formation_energy_per_atom", "analysis.formation_energy_per_atom", None),
    ("e_above_hull", "analysis.e_above_hull", None),
    ("band_gap", "analysis.bandgap", Some("output.bandgap")),
    ("total_magnetization", "analysis.total_magnetization", None),
    ("formula", "pretty_formula", Some("formula_pretty")),
    ("pretty_formula", "pretty_formula", Some("formula_pretty")),
    ("reduced_cell_formula", "reduced_cell_formula", None),
    ("unit_cell_formula", "unit_cell_formula", None),
    ("elements", "elements", None),
    ("nelements", "nelements", None),
    ("chemsys", "chemsys", None),
    ("structure", "output.crystal", None),
    ("initial_structure", "input.crystal", None),
    ("final_structure", "output.crystal", None),
    ("spacegroup", "output.spacegroup.symbol", Some("spacegroup.symbol")),
    ("is_hubbard", "is_hubbard", None),
    ("hubbards", "hubbards", None),
    ("run_type", "run_type", None),
    ("dir_name", "dir_name", None),
    ("updated_at", "last_updated", None),
    ("last_updated", "last_updated", None),
    ("author", "author", None),
    ("tags", "tags", None),
];

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Common names for task documents.
    pub fn with_defaults() -> Self {
        let mut map = AliasMap::new();
        for (name, primary, fallback) in DEFAULT_ALIASES {
            let mut target = AliasTarget::new(*primary);
            if let Some(fallback) = fallback {
                target = target.with_fallback(*fallback);
            }
            map.aliases.insert(name.to_string(), target);
        }
        map
    }

    pub fn insert(&mut self, name: &str, target: AliasTarget) -> Result<()> {
        validate(name, &target)?;
        self.aliases.insert(name.to_string(), target);
        Ok(())
    }

    /// Entries from `other` win.
    pub fn merge(&mut self, other: AliasMap) {
        self.aliases.extend(other.aliases);
    }

    /// JSON object of `name -> "path"` or `name -> ["primary", "fallback", ...]`.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| Error::config(format!("alias map is not valid JSON: {}", e)))?;
        let Value::Object(entries) = value else {
            return Err(Error::config("alias map must be a JSON object"));
        };

        let mut map = AliasMap::new();
        for (name, spec) in entries {
            let target = match spec {
                Value::String(path) => AliasTarget::new(path),
                Value::Array(paths) => {
                    let mut paths = paths.into_iter().map(|p| match p {
                        Value::String(s) => Ok(s),
                        other => Err(Error::config(format!(
                            "alias {}: paths must be strings, got {}",
                            name,
                            type_name(&other)
                        ))),
                    });
                    let primary = paths
                        .next()
                        .ok_or_else(|| Error::config(format!("alias {} has no paths", name)))??;
                    AliasTarget {
                        primary,
                        fallbacks: paths.collect::<Result<Vec<_>>>()?,
                    }
                }
                other => {
                    return Err(Error::config(format!(
                        "alias {}: expected a path or list of paths, got {}",
                        name,
                        type_name(&other)
                    )))
                }
            };
            map.insert(&name, target)?;
        }
        Ok(map)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read alias map {}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn get(&self, name: &str) -> Option<&AliasTarget> {
        self.aliases.get(name)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Candidate storage paths for a name. An alias may prefix a longer
    /// dotted path (`structure.lattice` -> `output.crystal.lattice`); anything
    /// unknown is taken as a literal storage path.
    pub fn resolve(&self, name: &str) -> Vec<String> {
        if let Some(target) = self.aliases.get(name) {
            return target.paths().map(str::to_string).collect();
        }
        if let Some((head, rest)) = name.split_once('.') {
            if let Some(target) = self.aliases.get(head) {
                return target.paths().map(|p| format!("{}.{}", p, rest)).collect();
            }
        }
        vec![name.to_string()]
    }

    /// Primary storage path for a name.
    pub fn primary(&self, name: &str) -> String {
        self.resolve(name)
            .into_iter()
            .next()
            .unwrap_or_else(|| name.to_string())
    }
}

fn validate(name: &str, target: &AliasTarget) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::config("alias name must not be empty"));
    }
    if name.starts_with('$') {
        return Err(Error::config(format!("alias {} must not start with '$'", name)));
    }
    for path in target.paths() {
        if path.is_empty() || path.split('.').any(str::is_empty) || path.starts_with('$') {
            return Err(Error::config(format!("alias {}: invalid storage path '{}'", name, path)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn resolves_alias_prefix_and_literal() {
        let map = AliasMap::with_defaults();
        assert_eq!(map.resolve("energy"), vec!["output.final_energy", "final_energy"]);
        assert_eq!(map.resolve("structure.lattice.volume"), vec!["output.crystal.lattice.volume"]);
        assert_eq!(map.resolve("custom.path"), vec!["custom.path"]);
        assert_eq!(map.primary("updated_at"), "last_updated");
    }

    #[test]
    fn loads_strings_and_lists() {
        let map = AliasMap::from_json_str(r#"{"gap": ["analysis.bandgap", "bandgap"], "e": "output.e"}"#).unwrap();
        assert_eq!(map.get("gap").unwrap().fallbacks, vec!["bandgap".to_string()]);
        assert_eq!(map.primary("e"), "output.e");
    }

    #[test]
    fn rejects_invalid_maps() {
        for raw in [r#"[]"#, r#"{"x": []}"#, r#"{"x": 3}"#, r#"{"x": "a..b"}"#, r#"{"$x": "a"}"#, r#"{"x": [1]}"#] {
            let err = AliasMap::from_json_str(raw).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Configuration, "{}", raw);
        }
    }
}
