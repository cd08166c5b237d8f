// =============================================================================
// ERROR — Taxonomie des échecs de migration
// =============================================================================
//
// Deux familles :
//   - les erreurs de CONSTRUCTION (mapping/requête mal formé), détectées une
//     seule fois avant de toucher la moindre instance ;
//   - les erreurs de PROPAGATION (Σ uniquement), qui n'apparaissent qu'une
//     fois les lignes semées. Elles abandonnent toute la migration.
//
// Dans les deux cas, aucune instance partielle n'est jamais visible.
//
// =============================================================================

use thiserror::Error;

use super::instance::RowId;
use super::validate::ValidationError;

#[derive(Error, Clone, Debug, PartialEq)]
pub enum MigrateError {
    /// Le mapping référence un objet/morphisme absent du schéma déclaré.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Diagramme qui référence un sommet/arête absent, ou étiquetage
    /// join/case incohérent avec la nature de l'objet.
    #[error("malformed mapping: {0}")]
    MalformedMapping(String),

    /// Domaine/codomaine mal alignés lors d'une composition.
    #[error("arity mismatch: {0}")]
    AritySizeMismatch(String),

    /// Σ : la propagation viole une équation ou identifie des valeurs brutes.
    #[error("non-functorial: {0}")]
    NonFunctorial(String),

    /// Morphisme cible sans image bien définie pour une ligne existante.
    #[error("unreachable morphism '{morphism}' on {entity}[{row}]")]
    UnreachableMorphism {
        morphism: String,
        entity: String,
        row: RowId,
    },

    /// L'instance source n'est pas totale.
    #[error("{entity}[{row}] has no value for '{edge}'")]
    MissingValue {
        entity: String,
        row: RowId,
        edge: String,
    },

    #[error("invalid instance ({} errors): {}", .0.len(), first_message(.0))]
    InvalidInstance(Vec<ValidationError>),
}

fn first_message(errors: &[ValidationError]) -> &str {
    errors.first().map(|e| e.message.as_str()).unwrap_or("")
}

pub type MigrateResult<T> = Result<T, MigrateError>;
