// =============================================================================
// CONFIG — Réglages d'évaluation
// =============================================================================
//
// Aucun état global : une configuration est une valeur passée explicitement
// à chaque transformateur (`QueryMigration::with_config`, ...).
//
// =============================================================================

use serde::{Deserialize, Serialize};

/// Réglages communs aux moteurs de migration.
///
/// ```json
/// { "parallel": true, "validate_source": false }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Évaluer les objets cibles indépendants sur plusieurs threads
    /// (moteur limite/colimite uniquement).
    pub parallel: bool,
    /// Valider l'instance source (totalité, équations) avant migration.
    pub validate_source: bool,
    /// Valider l'instance produite avant de la rendre.
    pub validate_result: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            parallel: false,
            validate_source: true,
            validate_result: false,
        }
    }
}

impl EvalConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EvalConfig::from_json_str(r#"{ "parallel": true }"#).unwrap();
        assert_eq!(config, EvalConfig {
            parallel: true,
            ..EvalConfig::default()
        });
    }

    #[test]
    fn test_invalid_json() {
        assert!(EvalConfig::from_json_str(r#"{ "parallel": "yes" }"#).is_err());
    }
}
