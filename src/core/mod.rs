// =============================================================================
// CORE — Module principal du cœur catégorique
// =============================================================================
//
// Toute la logique de migration, en mémoire : des catégories, des
// foncteurs et les trois façons de déplacer des données le long d'eux.
//
// Architecture :
//   typeside   → les types primitifs (String, Int, Bool...)
//   schema     → la catégorie qui décrit la structure (= le "moule")
//   instance   → le foncteur Schema → Set (= les données concrètes)
//   tabular    → vue tabulaire des lignes produites par une requête
//   error      → l'erreur commune à toutes les opérations
//   validate   → la vérification de cohérence
//   config     → réglages d'évaluation
//   mapping    → le foncteur entre schémas (= comment restructurer)
//   diagram    → les diagrammes finis de T (jointures et unions)
//   query      → requêtes S → T : un diagramme par entité de S
//   delta      → Δ : précomposition
//   limit      → évaluation des requêtes (limites puis colimites)
//   union_find → classes d'équivalence (unions, quotients de Σ)
//   sigma      → Σ : poussée puis quotient
//   migrate    → les transformateurs réutilisables Δ, requête, Σ
//
// =============================================================================

pub mod typeside;
pub mod schema;
pub mod instance;
pub mod tabular;
pub mod error;
pub mod validate;
pub mod config;
pub mod mapping;
pub mod diagram;
pub mod query;
pub mod delta;
pub mod limit;
pub mod union_find;
pub mod sigma;
pub mod migrate;
