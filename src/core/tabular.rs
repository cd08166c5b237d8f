// =============================================================================
// TABULAR — Vue tabulaire des résultats de requête
// =============================================================================
//
// Chaque ligne produite par une jointure ou une union garde sa provenance.
// La vue tabulaire l'expose comme un tuple nommé :
//
//   id | e1   | e2   | v
//   ---+------+------+-----
//   1  | E[1] | E[2] | V[2]
//
// Une ligne d'union affiche en plus son cas (`case`).
//
// Utile pour l'inspection et pour les tests.
//
// =============================================================================

use indexmap::IndexMap;
use serde::Serialize;

use super::error::MigrateResult;
use super::instance::{Instance, RowId, RowLabel};

/// Une ligne et les lignes qui la composent, par sommet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TabularRow {
    pub id: RowId,
    /// Le cas qui a produit la ligne (union), ou `None`.
    pub case: Option<String>,
    /// sommet → (entité, ligne)
    pub columns: IndexMap<String, (String, RowId)>,
}

/// Les lignes d'une entité, dans l'ordre des RowId.
pub fn tabular(instance: &Instance, entity: &str) -> MigrateResult<Vec<TabularRow>> {
    let data = instance.entity(entity)?;
    Ok(data.row_ids().into_iter()
        .map(|id| {
            let (case, columns) = match data.label(id) {
                Some(RowLabel::Tuple(components)) => (
                    None,
                    components.iter()
                        .map(|c| (c.vertex.clone(), (c.entity.clone(), c.row)))
                        .collect(),
                ),
                Some(RowLabel::Case(c)) => (
                    Some(c.vertex.clone()),
                    IndexMap::from([(c.vertex.clone(), (c.entity.clone(), c.row))]),
                ),
                None => (None, IndexMap::new()),
            };
            TabularRow { id, case, columns }
        })
        .collect())
}

/// Une colonne du rendu : les colonnes fixes ne se confondent jamais avec
/// un sommet du même nom.
enum Column<'r> {
    Id,
    Case,
    Vertex(&'r str),
}

/// Rend des lignes tabulaires en texte aligné.
pub fn render(rows: &[TabularRow]) -> String {
    let mut columns = vec![Column::Id];
    if rows.iter().any(|r| r.case.is_some()) {
        columns.push(Column::Case);
    }
    let mut vertices: Vec<&str> = Vec::new();
    for row in rows {
        for vertex in row.columns.keys() {
            if !vertices.contains(&vertex.as_str()) {
                vertices.push(vertex);
            }
        }
    }
    columns.extend(vertices.into_iter().map(Column::Vertex));

    let headers: Vec<String> = columns.iter()
        .map(|c| match c {
            Column::Id => "id".to_string(),
            Column::Case => "case".to_string(),
            Column::Vertex(vertex) => vertex.to_string(),
        })
        .collect();

    let cells: Vec<Vec<String>> = rows.iter()
        .map(|row| {
            columns.iter()
                .map(|c| match c {
                    Column::Id => row.id.to_string(),
                    Column::Case => row.case.clone().unwrap_or_default(),
                    Column::Vertex(vertex) => row.columns.get(*vertex)
                        .map(|(entity, r)| format!("{}[{}]", entity, r))
                        .unwrap_or_default(),
                })
                .collect()
        })
        .collect();

    let widths: Vec<usize> = headers.iter().enumerate()
        .map(|(i, h)| cells.iter().map(|c| c[i].len()).chain([h.len()]).max().unwrap_or(0))
        .collect();

    let line = |values: &[String]| -> String {
        values.iter().zip(&widths)
            .map(|(v, w)| format!("{:<w$}", v, w = *w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = line(headers.as_slice());
    out.push('\n');
    out.push_str(&widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-"));
    out.push('\n');
    for row in &cells {
        out.push_str(&line(row.as_slice()));
        out.push('\n');
    }
    out
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instance::Component;
    use crate::core::schema::Schema;
    use pretty_assertions::assert_eq;

    fn labelled() -> Instance {
        let mut s = Schema::new("S");
        s.add_node("E");
        let mut inst = Instance::new("I", &s);
        let data = inst.entity_mut("E").unwrap();
        let id = data.push_row();
        data.set_label(id, RowLabel::Tuple(vec![
            Component { vertex: "e1".into(), entity: "E".into(), row: 1 },
            Component { vertex: "v".into(), entity: "V".into(), row: 2 },
        ]));
        let id = data.push_row();
        data.set_label(id, RowLabel::Case(Component { vertex: "rev".into(), entity: "E".into(), row: 7 }));
        inst
    }

    #[test]
    fn test_tabular_rows() {
        let rows = tabular(&labelled(), "E").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].case, None);
        assert_eq!(rows[0].columns["v"], ("V".to_string(), 2));
        assert_eq!(rows[1].case.as_deref(), Some("rev"));
        assert_eq!(rows[1].columns["rev"], ("E".to_string(), 7));
    }

    #[test]
    fn test_render_vertex_named_like_fixed_column() {
        let mut s = Schema::new("S");
        s.add_node("E");
        let mut inst = Instance::new("I", &s);
        let data = inst.entity_mut("E").unwrap();
        let id = data.push_row();
        data.set_label(id, RowLabel::Case(Component { vertex: "id".into(), entity: "E".into(), row: 9 }));
        let id = data.push_row();
        data.set_label(id, RowLabel::Case(Component { vertex: "case".into(), entity: "V".into(), row: 4 }));

        let text = render(&tabular(&inst, "E").unwrap());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id | case | id   | case");
        assert_eq!(lines[2], "1  | id   | E[9] |");
        assert_eq!(lines[3], "2  | case |      | V[4]");
    }

    #[test]
    fn test_render() {
        let text = render(&tabular(&labelled(), "E").unwrap());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id | case | e1   | v    | rev");
        assert_eq!(lines[2], "1  |      | E[1] | V[2] |");
        assert_eq!(lines[3], "2  | rev  |      |      | E[7]");
    }
}
