// =============================================================================
// CATMIG — Évaluateur de migrations catégoriques en Rust
// =============================================================================
//
// Catmig déplace des données d'un schéma à un autre en suivant des
// foncteurs entre schémas, entièrement en mémoire.
//
// Concepts fondamentaux :
//   Schema   = une catégorie (nœuds + arêtes + équations de chemins)
//   Instance = un foncteur Schema → Set (les données)
//   Mapping  = un foncteur entre schémas (comment restructurer)
//   Query    = pour chaque entité, un diagramme fini de lignes à joindre
//              (limite) ou à réunir (colimite)
//   Δ, Σ     = précomposition et poussée le long d'un mapping
//
// =============================================================================

pub mod core;

pub use crate::core::config::EvalConfig;
pub use crate::core::error::{MigrateError, MigrateResult};
pub use crate::core::migrate::{migrate, migrate_into, DeltaMigration, Migrator, QueryMigration, SigmaMigration};
