// =============================================================================
// VALIDATE — Vérification des structures avant migration
// =============================================================================
//
// Les moteurs SUPPOSENT que :
//   - le schéma est bien formé (arêtes entre nœuds existants, équations typées)
//   - l'instance source est totale (chaque ligne a une image par chaque FK
//     et chaque attribut de son entité) et respecte les équations.
//
// Ce module vérifie ces hypothèses une fois, en amont. `EvalConfig`
// décide si les migrations l'appellent sur leur source.
//
// =============================================================================

use thiserror::Error;

use super::instance::{Instance, RowId};
use super::schema::{Edge, Path, Schema};
use super::typeside::Value;

/// Erreur de validation
#[derive(Error, Debug, Clone, PartialEq)]
#[error("validation error: {message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    fn new(message: String) -> Self {
        ValidationError { message }
    }
}

/// Vérifie qu'un Schema est bien formé.
///
/// - Toute arête référence des nœuds qui existent
/// - Chaque équation est typée et ses deux côtés sont parallèles
pub fn validate_schema(schema: &Schema) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (edge_name, edge) in &schema.edges {
        if !schema.nodes.contains_key(edge.source()) {
            errors.push(ValidationError::new(format!(
                "'{}' : le nœud source '{}' n'existe pas",
                edge_name, edge.source()
            )));
        }
        if let Edge::ForeignKey { target, .. } = edge {
            if !schema.nodes.contains_key(target) {
                errors.push(ValidationError::new(format!(
                    "FK '{}' : le nœud cible '{}' n'existe pas",
                    edge_name, target
                )));
            }
        }
    }

    for (i, eq) in schema.path_equations.iter().enumerate() {
        if eq.lhs.start != eq.rhs.start {
            errors.push(ValidationError::new(format!(
                "Équation {} ({}) : les deux côtés ne partent pas du même nœud",
                i, eq
            )));
        }
        match (schema.path_end(&eq.lhs), schema.path_end(&eq.rhs)) {
            (Ok(lhs), Ok(rhs)) if lhs != rhs => {
                errors.push(ValidationError::new(format!(
                    "Équation {} ({}) : les deux côtés n'arrivent pas au même objet",
                    i, eq
                )));
            }
            (Ok(_), Ok(_)) => {}
            (lhs, rhs) => {
                for e in [lhs.err(), rhs.err()].into_iter().flatten() {
                    errors.push(ValidationError::new(format!("Équation {} : {}", i, e)));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Vérifie qu'une Instance est un foncteur total sur le Schema.
///
/// - Chaque FK et chaque attribut est une fonction totale
/// - Les FK pointent vers des lignes qui existent
/// - Les équations de chemins sont satisfaites pour toutes les lignes
pub fn validate_instance(instance: &Instance, schema: &Schema) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if instance.schema_name != schema.name {
        errors.push(ValidationError::new(format!(
            "L'instance '{}' est sur le schéma '{}', pas '{}'",
            instance.name, instance.schema_name, schema.name
        )));
    }

    for (entity_name, entity_data) in &instance.data {
        if !schema.nodes.contains_key(entity_name) {
            errors.push(ValidationError::new(format!(
                "L'entité '{}' n'existe pas dans le schéma", entity_name
            )));
            continue;
        }

        let outgoing = schema.edges_from(entity_name);
        for row_id in entity_data.row_ids() {
            for edge in &outgoing {
                match edge {
                    Edge::ForeignKey { name, target, .. } => match entity_data.get_fk(row_id, name) {
                        None => errors.push(ValidationError::new(format!(
                            "{} row[{}] : FK '{}' manquante",
                            entity_name, row_id, name
                        ))),
                        Some(target_row) => {
                            let exists = instance.data.get(target)
                                .is_some_and(|td| td.contains(target_row));
                            if !exists {
                                errors.push(ValidationError::new(format!(
                                    "{} row[{}] : FK '{}' pointe vers {}[{}] qui n'existe pas",
                                    entity_name, row_id, name, target, target_row
                                )));
                            }
                        }
                    },
                    Edge::Attribute { name, target, .. } => match entity_data.get_attr(row_id, name) {
                        None => errors.push(ValidationError::new(format!(
                            "{} row[{}] : attribut '{}' manquant",
                            entity_name, row_id, name
                        ))),
                        Some(value) if !value.inhabits(target) => {
                            errors.push(ValidationError::new(format!(
                                "{} row[{}] : attribut '{}' = {} n'est pas de type {}",
                                entity_name, row_id, name, value, target
                            )));
                        }
                        Some(_) => {}
                    },
                }
            }
        }
    }

    // Les équations ne sont vérifiables que sur une instance totale.
    if !errors.is_empty() {
        return Err(errors);
    }

    check_equations(instance, schema)
}

/// Vérifie les seules équations de chemins, sur une instance supposée
/// totale.
pub fn check_equations(instance: &Instance, schema: &Schema) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    for eq in &schema.path_equations {
        let Ok(entity_data) = instance.entity(&eq.lhs.start) else {
            continue;
        };
        for row_id in entity_data.row_ids() {
            let lhs = eval_side(instance, schema, &eq.lhs, row_id);
            let rhs = eval_side(instance, schema, &eq.rhs, row_id);
            if lhs != rhs {
                errors.push(ValidationError::new(format!(
                    "Équation de chemins violée pour {}[{}] : {}",
                    eq.lhs.start, row_id, eq
                )));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Ce qu'on observe au bout d'un côté d'équation.
#[derive(Debug, PartialEq)]
enum Observed {
    Row(RowId),
    Value(Value),
}

/// Évalue un côté d'équation : une ligne, ou une valeur si le chemin
/// se termine par un attribut. `None` si le chemin ne s'évalue pas.
fn eval_side(instance: &Instance, schema: &Schema, path: &Path, row: RowId) -> Option<Observed> {
    match path.edges.split_last() {
        Some((last, fks)) if schema.attribute(last).is_ok() => {
            let fk_path = Path {
                start: path.start.clone(),
                edges: fks.to_vec(),
            };
            instance.read_attribute(schema, &fk_path, last, row).ok().map(Observed::Value)
        }
        _ => instance.follow_path(schema, path, row).ok().map(Observed::Row),
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::typeside::BaseType;
    use std::collections::HashMap;

    fn loop_schema() -> Schema {
        let mut s = Schema::new("Test");
        s.add_node("A")
         .add_node("B")
         .add_fk("f", "A", "B")
         .add_fk("g", "B", "A")
         .add_attribute("name", "A", BaseType::String)
         .add_path_equation(Path::new("A", vec!["f", "g"]), Path::identity("A"));
        s
    }

    #[test]
    fn test_validate_schema_ok() {
        assert!(validate_schema(&loop_schema()).is_ok());
    }

    #[test]
    fn test_validate_schema_ill_typed_equation() {
        let mut s = loop_schema();
        s.add_path_equation(Path::new("A", vec!["f"]), Path::identity("A"));
        let errors = validate_schema(&s).unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_validate_instance_ok() {
        let s = loop_schema();
        let mut inst = Instance::new("TestData", &s);
        let a1 = inst.insert("A",
            HashMap::from([("name".to_string(), Value::String("test".into()))]),
            HashMap::new(),
        ).unwrap();
        let b1 = inst.insert("B", HashMap::new(), HashMap::from([("g".to_string(), a1)])).unwrap();
        inst.entity_mut("A").unwrap().set_fk(a1, "f", b1);

        assert!(validate_instance(&inst, &s).is_ok());
    }

    #[test]
    fn test_validate_instance_broken_fk() {
        let s = loop_schema();
        let mut inst = Instance::new("TestData", &s);
        // Un A qui pointe vers un B inexistant (row_id 999)
        inst.insert("A",
            HashMap::from([("name".to_string(), Value::String("x".into()))]),
            HashMap::from([("f".to_string(), 999)]),
        ).unwrap();

        let errors = validate_instance(&inst, &s).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("999"));
    }

    #[test]
    fn test_validate_instance_equation_violated() {
        let s = loop_schema();
        let mut inst = Instance::new("TestData", &s);
        let name = |n: &str| HashMap::from([("name".to_string(), Value::String(n.into()))]);
        let a1 = inst.insert("A", name("a1"), HashMap::new()).unwrap();
        let a2 = inst.insert("A", name("a2"), HashMap::new()).unwrap();
        let b1 = inst.insert("B", HashMap::new(), HashMap::from([("g".to_string(), a1)])).unwrap();
        inst.entity_mut("A").unwrap().set_fk(a1, "f", b1);
        inst.entity_mut("A").unwrap().set_fk(a2, "f", b1);

        // a2.f.g = a1 ≠ a2
        let errors = validate_instance(&inst, &s).unwrap_err();
        assert_eq!(errors.len(), 1);
    }
}
