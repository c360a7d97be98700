//! Scenario catalog.
//!
//! A [`ScenarioCatalog`] is loaded once from a [`CatalogDocument`], validated,
//! and is read-only afterwards. Share it behind an `Arc` for concurrent
//! readers.
//!
//! Loading fails with `FlywheelError::CatalogLoad` when a definition is
//! malformed (missing id, unknown severity, empty indicator set, bad regex)
//! or when two scenarios in the same domain share an id.

pub mod builtin;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::domain::{FlywheelError, Result, Scenario, ScenarioDefinition};

/// Serialized form of a catalog: scenario definitions grouped by domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub version: String,
    pub domains: BTreeMap<String, Vec<ScenarioDefinition>>,
}

#[derive(Debug, Clone)]
struct DomainScenarios {
    scenarios: Vec<Scenario>,
    by_id: HashMap<String, usize>,
}

/// Immutable, versioned set of scenarios per domain.
#[derive(Debug, Clone)]
pub struct ScenarioCatalog {
    version: String,
    digest: String,
    domains: BTreeMap<String, DomainScenarios>,
}

impl ScenarioCatalog {
    /// Validate and compile every definition in `doc`.
    pub fn from_document(doc: &CatalogDocument) -> Result<Self> {
        let mut domains = BTreeMap::new();

        for (domain, defs) in &doc.domains {
            if defs.is_empty() {
                return Err(FlywheelError::catalog(domain, "domain has no scenarios"));
            }

            let mut scenarios = Vec::with_capacity(defs.len());
            let mut by_id = HashMap::with_capacity(defs.len());
            for def in defs {
                let scenario = Scenario::from_definition(domain, def)?;
                if by_id.contains_key(&scenario.id) {
                    return Err(FlywheelError::catalog(
                        domain,
                        format!("duplicate scenario id '{}'", scenario.id),
                    ));
                }
                by_id.insert(scenario.id.clone(), scenarios.len());
                scenarios.push(scenario);
            }

            debug!(domain = %domain, scenarios = scenarios.len(), "loaded catalog domain");
            domains.insert(domain.clone(), DomainScenarios { scenarios, by_id });
        }

        let canonical = serde_json::to_vec(doc)?;
        let digest = hex::encode(Sha256::digest(&canonical));

        info!(
            version = %doc.version,
            domains = domains.len(),
            digest = %&digest[..12],
            "scenario catalog loaded"
        );

        Ok(Self {
            version: doc.version.clone(),
            digest,
            domains,
        })
    }

    /// Parse a JSON catalog document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let doc: CatalogDocument = serde_json::from_str(json)
            .map_err(|e| FlywheelError::catalog("<document>", format!("invalid JSON: {e}")))?;
        Self::from_document(&doc)
    }

    /// Read and parse a JSON catalog document from disk.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            FlywheelError::catalog("<document>", format!("read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// The bundled finance, security and ML-governance catalogs.
    pub fn builtin() -> Result<Self> {
        Self::from_document(&builtin::document())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// SHA-256 hex digest of the source document.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(String::as_str)
    }

    /// All scenarios of a domain in definition order.
    pub fn scenarios_for(&self, domain: &str) -> Result<&[Scenario]> {
        self.domains
            .get(domain)
            .map(|d| d.scenarios.as_slice())
            .ok_or_else(|| FlywheelError::UnknownDomain(domain.to_string()))
    }

    pub fn scenario_by_id(&self, domain: &str, id: &str) -> Result<&Scenario> {
        let d = self
            .domains
            .get(domain)
            .ok_or_else(|| FlywheelError::UnknownDomain(domain.to_string()))?;
        d.by_id
            .get(id)
            .map(|&i| &d.scenarios[i])
            .ok_or_else(|| FlywheelError::ScenarioNotFound {
                domain: domain.to_string(),
                id: id.to_string(),
            })
    }

    /// Resolve ids into scenarios, preserving catalog order and failing on
    /// any id the domain does not define.
    pub fn select(&self, domain: &str, ids: &[String]) -> Result<Vec<Scenario>> {
        for id in ids {
            self.scenario_by_id(domain, id)?;
        }
        Ok(self
            .scenarios_for(domain)?
            .iter()
            .filter(|s| ids.contains(&s.id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IndicatorSpec, Severity};

    fn def(id: &str) -> ScenarioDefinition {
        ScenarioDefinition {
            id: id.to_string(),
            name: id.to_string(),
            severity: "high".to_string(),
            frameworks: vec![],
            category: None,
            indicators: vec![IndicatorSpec::Keyword {
                value: "leak".to_string(),
            }],
            remediation: String::new(),
        }
    }

    fn doc(defs: Vec<ScenarioDefinition>) -> CatalogDocument {
        CatalogDocument {
            version: "1".to_string(),
            domains: BTreeMap::from([("finance".to_string(), defs)]),
        }
    }

    #[test]
    fn test_lookup_by_id_and_domain() {
        let catalog = ScenarioCatalog::from_document(&doc(vec![def("a"), def("b")])).unwrap();
        assert_eq!(catalog.scenarios_for("finance").unwrap().len(), 2);
        assert_eq!(catalog.scenario_by_id("finance", "b").unwrap().id, "b");
        assert_eq!(
            catalog.scenario_by_id("finance", "b").unwrap().severity,
            Severity::High
        );
        assert!(matches!(
            catalog.scenario_by_id("finance", "zzz"),
            Err(FlywheelError::ScenarioNotFound { .. })
        ));
        assert!(matches!(
            catalog.scenarios_for("retail"),
            Err(FlywheelError::UnknownDomain(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = ScenarioCatalog::from_document(&doc(vec![def("a"), def("a")]))
            .expect_err("duplicate id");
        assert!(matches!(err, FlywheelError::CatalogLoad { .. }));
        assert!(err.to_string().contains("duplicate scenario id 'a'"));
    }

    #[test]
    fn test_select_preserves_catalog_order() {
        let catalog =
            ScenarioCatalog::from_document(&doc(vec![def("a"), def("b"), def("c")])).unwrap();
        let picked = catalog
            .select("finance", &["c".to_string(), "a".to_string()])
            .unwrap();
        let ids: Vec<_> = picked.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(catalog.select("finance", &["nope".to_string()]).is_err());
    }

    #[test]
    fn test_digest_is_stable() {
        let a = ScenarioCatalog::from_document(&doc(vec![def("a")])).unwrap();
        let b = ScenarioCatalog::from_document(&doc(vec![def("a")])).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }
}
