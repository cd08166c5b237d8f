// =============================================================================
// DIAGRAM — Un motif fini au-dessus d'un schéma
// =============================================================================
//
// Un diagramme est un petit graphe dont l'image est un foncteur vers un
// schéma C :
//   - chaque SOMMET est lié à une entité de C
//   - chaque ARÊTE v1 → v2 est liée à un chemin de C de entité(v1) à entité(v2)
//
// Le même diagramme sert de motif dans deux sens :
//
//   JOIN (limite)  : on cherche tous les tuples (une ligne par sommet) qui
//                    respectent les arêtes → équi-jointure.
//   CASE (colimite): on prend l'union disjointe des lignes de chaque sommet,
//                    les arêtes identifiant x (dans v1) avec p(x) (dans v2).
//
// EXEMPLE — les chemins de longueur 2 d'un graphe :
//
//   e1 : E ──tgt = src──▶ e2 : E       (arête e1 → e2 étiquetée par ?)
//
//   En pratique on passe par les sommets V :
//     e1 : E, e2 : E, v : V
//     e1 → v  via  E.tgt
//     e2 → v  via  E.src
//
// Les FILTRES sont les sommets "libres" : ils contraignent une valeur
// d'attribut (égale à une constante, ou à une autre valeur du tuple).
// Ils n'ont de sens que pour une jointure.
//
// =============================================================================

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::error::{MigrateError, MigrateResult};
use super::schema::{Path, PathEnd, Schema};
use super::typeside::{BaseType, CompOp, Value};

/// Arête d'un diagramme : `path` va de entité(source) à entité(target).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramEdge {
    pub source: String,
    pub target: String,
    pub path: Path,
}

/// Une valeur lue depuis un sommet : sommet.fk_path.attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRef {
    pub vertex: String,
    pub fk_path: Vec<String>,
    pub attribute: String,
}

impl AttributeRef {
    pub fn new(vertex: &str, fk_path: Vec<&str>, attribute: &str) -> Self {
        AttributeRef {
            vertex: vertex.to_string(),
            fk_path: fk_path.into_iter().map(str::to_string).collect(),
            attribute: attribute.to_string(),
        }
    }
}

impl std::fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.vertex)?;
        for fk in &self.fk_path {
            write!(f, ".{}", fk)?;
        }
        write!(f, ".{}", self.attribute)
    }
}

/// Contrainte sur les valeurs d'attributs d'un tuple de jointure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// `attr op constante` (ex: e.salary > 80000)
    Compare {
        attr: AttributeRef,
        op: CompOp,
        value: Value,
    },
    /// Deux valeurs du tuple sont égales (jointure sur attributs)
    SameValue { left: AttributeRef, right: AttributeRef },
}

impl Filter {
    /// Les sommets dont dépend ce filtre
    pub fn vertices(&self) -> Vec<&str> {
        match self {
            Filter::Compare { attr, .. } => vec![attr.vertex.as_str()],
            Filter::SameValue { left, right } => vec![left.vertex.as_str(), right.vertex.as_str()],
        }
    }
}

/// Un diagramme fini : sommets nommés + arêtes + filtres.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Diagram {
    /// sommet → entité du schéma ambiant, dans l'ordre de déclaration
    pub vertices: IndexMap<String, String>,
    pub edges: Vec<DiagramEdge>,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

impl Diagram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex(mut self, name: &str, entity: &str) -> Self {
        self.vertices.insert(name.to_string(), entity.to_string());
        self
    }

    pub fn edge(mut self, source: &str, target: &str, path: Path) -> Self {
        self.edges.push(DiagramEdge {
            source: source.to_string(),
            target: target.to_string(),
            path,
        });
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Indice d'un sommet (ordre de déclaration)
    pub fn index_of(&self, vertex: &str) -> MigrateResult<usize> {
        self.vertices.get_index_of(vertex).ok_or_else(|| {
            MigrateError::MalformedMapping(format!("vertex '{}' is not in the diagram", vertex))
        })
    }

    /// Entité liée à un sommet
    pub fn entity_of(&self, vertex: &str) -> MigrateResult<&str> {
        self.vertices.get(vertex).map(String::as_str).ok_or_else(|| {
            MigrateError::MalformedMapping(format!("vertex '{}' is not in the diagram", vertex))
        })
    }

    /// Type de la valeur désignée par `attr`.
    pub fn attribute_type<'a>(&self, attr: &AttributeRef, schema: &'a Schema) -> MigrateResult<&'a BaseType> {
        let mut edges = attr.fk_path.clone();
        edges.push(attr.attribute.clone());
        let path = Path {
            start: self.entity_of(&attr.vertex)?.to_string(),
            edges,
        };
        match schema.path_end(&path)? {
            PathEnd::Value(_) => {
                let (_, ty) = schema.attribute(&attr.attribute)?;
                Ok(ty)
            }
            PathEnd::Entity(_) => Err(MigrateError::AritySizeMismatch(format!(
                "{} does not end in an attribute",
                attr
            ))),
        }
    }

    /// Vérifie le diagramme contre le schéma ambiant.
    pub fn validate(&self, schema: &Schema) -> MigrateResult<()> {
        for entity in self.vertices.values() {
            schema.require_node(entity)?;
        }
        for edge in &self.edges {
            let from = self.entity_of(&edge.source)?;
            let to = self.entity_of(&edge.target)?;
            schema.check_path(&edge.path, from, to)?;
        }
        for filter in &self.filters {
            match filter {
                Filter::Compare { attr, value, .. } => {
                    let ty = self.attribute_type(attr, schema)?;
                    if !value.inhabits(ty) {
                        return Err(MigrateError::AritySizeMismatch(format!(
                            "filter on {} compares a {} with {}",
                            attr, ty, value
                        )));
                    }
                }
                Filter::SameValue { left, right } => {
                    let lt = self.attribute_type(left, schema)?;
                    let rt = self.attribute_type(right, schema)?;
                    if lt != rt {
                        return Err(MigrateError::AritySizeMismatch(format!(
                            "filter {} = {} compares {} with {}",
                            left, right, lt, rt
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Diagram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let vertices: Vec<String> = self.vertices.iter()
            .map(|(v, e)| format!("{}:{}", v, e))
            .collect();
        write!(f, "{{{}", vertices.join(", "))?;
        for edge in &self.edges {
            write!(f, "; {} -> {} via {}", edge.source, edge.target, edge.path)?;
        }
        for filter in &self.filters {
            match filter {
                Filter::Compare { attr, op, value } => write!(f, "; {} {} {}", attr, op, value)?,
                Filter::SameValue { left, right } => write!(f, "; {} = {}", left, right)?,
            }
        }
        write!(f, "}}")
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn graph_schema() -> Schema {
        let mut s = Schema::new("Graph");
        s.add_node("E")
         .add_node("V")
         .add_fk("src", "E", "V")
         .add_fk("tgt", "E", "V")
         .add_attribute("weight", "E", BaseType::Integer)
         .add_attribute("label", "V", BaseType::String);
        s
    }

    fn two_path() -> Diagram {
        Diagram::new()
            .vertex("e1", "E")
            .vertex("e2", "E")
            .vertex("v", "V")
            .edge("e1", "v", Path::new("E", vec!["tgt"]))
            .edge("e2", "v", Path::new("E", vec!["src"]))
    }

    #[test]
    fn test_valid_diagram() {
        let d = two_path().filter(Filter::Compare {
            attr: AttributeRef::new("e1", vec![], "weight"),
            op: CompOp::Gt,
            value: Value::Integer(3),
        });
        assert_eq!(d.validate(&graph_schema()), Ok(()));
        assert_eq!(d.index_of("v"), Ok(2));
        assert_eq!(format!("{}", d), "{e1:E, e2:E, v:V; e1 -> v via E.tgt; e2 -> v via E.src; e1.weight > 3}");
    }

    #[test]
    fn test_missing_vertex() {
        let d = two_path().edge("e1", "w", Path::new("E", vec!["src"]));
        assert!(matches!(d.validate(&graph_schema()), Err(MigrateError::MalformedMapping(_))));
    }

    #[test]
    fn test_edge_path_misaligned() {
        let d = two_path().edge("v", "e1", Path::new("E", vec!["src"]));
        assert!(matches!(d.validate(&graph_schema()), Err(MigrateError::AritySizeMismatch(_))));
    }

    #[test]
    fn test_filter_type_mismatch() {
        let d = two_path().filter(Filter::SameValue {
            left: AttributeRef::new("e1", vec![], "weight"),
            right: AttributeRef::new("v", vec![], "label"),
        });
        assert!(matches!(d.validate(&graph_schema()), Err(MigrateError::AritySizeMismatch(_))));

        let d = two_path().filter(Filter::Compare {
            attr: AttributeRef::new("v", vec![], "label"),
            op: CompOp::Eq,
            value: Value::Integer(1),
        });
        assert!(matches!(d.validate(&graph_schema()), Err(MigrateError::AritySizeMismatch(_))));
    }
}
