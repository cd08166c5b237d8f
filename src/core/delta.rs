// =============================================================================
// DELTA — Migration par précomposition (pullback)
// =============================================================================
//
// Étant donné un Mapping F : S → T et une instance X de T, Δ_F(X) est
// l'instance Y = X ∘ F de S :
//
//   Y(A)     = X(F(A))            mêmes RowId, aucune copie d'identité
//   Y(f)(r)  = X(F(f))(r)         on suit le chemin F(f) dans X
//   Y(att)(r)= X(F(att))(r)       idem, puis on lit la valeur brute
//
//   S                T
//   Person ──F──▶ Employee        Y(Person) = X(Employee)
//     │works_in      │department
//     ▼              ▼
//   Dept   ──F──▶ Department      Y(works_in) = X(department)
//
// Δ ne crée ni ne fusionne de lignes : c'est une vue.
//
// MERGE (delta_into) : les lignes de Δ_F(X) sont AJOUTÉES à une instance
// existante Y₀ de S, sous de nouveaux identifiants (coproduit Y₀ ⊔ Δ_F(X)).
//
// =============================================================================

use tracing::debug;

use super::error::{MigrateError, MigrateResult};
use super::instance::Instance;
use super::mapping::{EdgeMapping, Mapping};
use super::schema::{Edge, Path, Schema};

/// Δ_F(X) : une instance fraîche de `source_schema`.
///
/// Le mapping est supposé validé (`Mapping::validate`) ; les erreurs
/// restantes viennent d'une instance non totale (`MissingValue`).
pub fn delta(
    mapping: &Mapping,
    source_schema: &Schema,
    target_schema: &Schema,
    target_instance: &Instance,
) -> MigrateResult<Instance> {
    let mut result = Instance::new(&format!("delta_{}", mapping.name), source_schema);

    for node in source_schema.nodes.keys() {
        let image = mapping.node_image(node)?;
        let rows = target_instance.entity(image)?.row_ids();
        let edges = source_schema.edges_from(node);

        let mut produced = Vec::with_capacity(rows.len());
        for row in rows {
            let mut attrs = Vec::new();
            let mut fks = Vec::new();
            for edge in &edges {
                match (edge, mapping.edge_mapping.get(edge.name())) {
                    (Edge::ForeignKey { name, .. }, Some(EdgeMapping::FkToPath(path))) => {
                        fks.push((name.clone(), target_instance.follow_path(target_schema, path, row)?));
                    }
                    (Edge::Attribute { name, .. }, Some(EdgeMapping::AttrToPath { fk_path, attr_name })) => {
                        let path = Path {
                            start: image.to_string(),
                            edges: fk_path.clone(),
                        };
                        let value = target_instance.read_attribute(target_schema, &path, attr_name, row)?;
                        attrs.push((name.clone(), value));
                    }
                    _ => {
                        return Err(MigrateError::MalformedMapping(format!(
                            "mapping '{}' has no image of the right kind for '{}'",
                            mapping.name,
                            edge.name()
                        )));
                    }
                }
            }
            produced.push((row, attrs, fks));
        }

        let data = result.entity_mut(node)?;
        for (row, attrs, fks) in produced {
            data.insert_with_id(row, attrs, fks);
        }
        debug!(entity = %node, image = %image, rows = data.len(), "delta: entity pulled back");
    }

    Ok(result)
}

/// Y₀ ⊔ Δ_F(X), écrit dans `existing`.
///
/// Δ_F(X) est calculé entièrement avant la moindre écriture : en cas
/// d'erreur, `existing` est intact.
pub fn delta_into(
    existing: &mut Instance,
    mapping: &Mapping,
    source_schema: &Schema,
    target_schema: &Schema,
    target_instance: &Instance,
) -> MigrateResult<()> {
    let fresh = delta(mapping, source_schema, target_schema, target_instance)?;
    existing.coproduct_in_place(&fresh, source_schema)?;
    debug!(
        instance = %existing.name,
        added = fresh.total_rows(),
        total = existing.total_rows(),
        "delta: merged in place"
    );
    Ok(())
}
