// =============================================================================
// QUERY — Requêtes conjonctives (join) et agglomératives (case)
// =============================================================================
//
// Une requête Q : S → T généralise le Mapping : chaque entité de S est
// envoyée non plus sur UNE entité de T, mais sur un MOTIF au-dessus de T.
//
//   ObjectImage::Plain(c)  : les lignes de c, telles quelles (comme Δ)
//   ObjectImage::Join(J)   : les tuples qui satisfont le diagramme J (limite)
//   ObjectImage::Case(J)   : l'union étiquetée des sommets de J (colimite)
//
// Chaque FK m : d1 → d2 de S reçoit une image qui, à partir d'une ligne
// de Q(d1), construit une ligne de Q(d2) :
//
//   ┌──────────────┬───────────────────────────────────────────────────┐
//   │ codomaine    │ image                                             │
//   ├──────────────┼───────────────────────────────────────────────────┤
//   │ plain        │ Select(sélecteur)                                 │
//   │ join         │ Tuple(un sélecteur par sommet du codomaine)       │
//   │ case         │ Inject { cas, sélecteur }                         │
//   │ (dom. case)  │ Dispatch(une image par cas du domaine)            │
//   └──────────────┴───────────────────────────────────────────────────┘
//
// Un SÉLECTEUR désigne une ligne de T :
//   - depuis une ligne plain ou un bras de case : un chemin de T
//   - depuis un tuple de jointure : un sommet, puis un chemin de T
//
// EXEMPLE — chemins de longueur 2 d'un graphe :
//   Q(V)  = Plain(V)
//   Q(E)  = Join { e1:E, e2:E, v:V ; e1.tgt = v ; e2.src = v }
//   Q(src) = Select(Vertex { e1, E.src })
//   Q(tgt) = Select(Vertex { e2, E.tgt })
//
// Toute la vérification de typage est faite par `validate`, une seule fois,
// avant qu'aucune instance ne soit touchée.
//
// =============================================================================

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::diagram::Diagram;
use super::error::{MigrateError, MigrateResult};
use super::mapping::{EdgeMapping, Mapping};
use super::schema::{Edge, Path, Schema};
use super::typeside::BaseType;

/// Image d'une entité de S.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectImage {
    Plain(String),
    Join(Diagram),
    Case(Diagram),
}

impl ObjectImage {
    pub fn kind(&self) -> &'static str {
        match self {
            ObjectImage::Plain(_) => "plain",
            ObjectImage::Join(_) => "join",
            ObjectImage::Case(_) => "case",
        }
    }
}

/// Désigne une ligne de T à partir d'une ligne source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Selector {
    /// Depuis une ligne plain (ou un bras de case) : suivre un chemin.
    Path(Path),
    /// Depuis un tuple de jointure : prendre la composante `vertex`, puis
    /// suivre `path` (qui part de l'entité du sommet).
    Vertex { vertex: String, path: Path },
}

impl Selector {
    pub fn path(start: &str, edges: Vec<&str>) -> Self {
        Selector::Path(Path::new(start, edges))
    }

    pub fn at(vertex: &str, path: Path) -> Self {
        Selector::Vertex { vertex: vertex.to_string(), path }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Path(path) => write!(f, "{}", path),
            Selector::Vertex { vertex, path } => write!(f, "{}/{}", vertex, path),
        }
    }
}

/// Image d'une FK de S.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MorphismImage {
    Select(Selector),
    Tuple(IndexMap<String, Selector>),
    Inject { case: String, selector: Selector },
    Dispatch(IndexMap<String, MorphismImage>),
}

/// Image d'un attribut de S : lire un attribut de T sur une ligne désignée.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeImage {
    Read { selector: Selector, attribute: String },
    Dispatch(IndexMap<String, AttributeImage>),
}

/// D'où part l'évaluation d'une image : la nature de la ligne source.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SourceShape<'q> {
    /// Une ligne d'une entité (plain, ou bras de case)
    Row(&'q str),
    Tuple(&'q Diagram),
    Case(&'q Diagram),
}

impl<'q> SourceShape<'q> {
    pub(crate) fn of(image: &'q ObjectImage) -> Self {
        match image {
            ObjectImage::Plain(entity) => SourceShape::Row(entity),
            ObjectImage::Join(diagram) => SourceShape::Tuple(diagram),
            ObjectImage::Case(diagram) => SourceShape::Case(diagram),
        }
    }
}

/// Une requête Q : S → T.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub name: String,
    /// S : le schéma de l'instance produite
    pub source_schema_name: String,
    /// T : le schéma de l'instance interrogée
    pub target_schema_name: String,
    pub objects: IndexMap<String, ObjectImage>,
    pub morphisms: IndexMap<String, MorphismImage>,
    pub attributes: IndexMap<String, AttributeImage>,
}

impl Query {
    pub fn new(name: &str, source: &str, target: &str) -> Self {
        Query {
            name: name.to_string(),
            source_schema_name: source.to_string(),
            target_schema_name: target.to_string(),
            objects: IndexMap::new(),
            morphisms: IndexMap::new(),
            attributes: IndexMap::new(),
        }
    }

    pub fn map_object(&mut self, entity: &str, image: ObjectImage) -> &mut Self {
        self.objects.insert(entity.to_string(), image);
        self
    }

    pub fn map_morphism(&mut self, fk: &str, image: MorphismImage) -> &mut Self {
        self.morphisms.insert(fk.to_string(), image);
        self
    }

    pub fn map_attribute(&mut self, attr: &str, image: AttributeImage) -> &mut Self {
        self.attributes.insert(attr.to_string(), image);
        self
    }

    /// Un Mapping simple vu comme requête : tout est plain.
    pub fn from_mapping(mapping: &Mapping, source: &Schema) -> MigrateResult<Query> {
        let mut query = Query::new(&mapping.name, &mapping.source_schema_name, &mapping.target_schema_name);
        for (node, image) in &mapping.node_mapping {
            query.map_object(node, ObjectImage::Plain(image.clone()));
        }
        for (edge_name, image) in &mapping.edge_mapping {
            match image {
                EdgeMapping::FkToPath(path) => {
                    query.map_morphism(edge_name, MorphismImage::Select(Selector::Path(path.clone())));
                }
                EdgeMapping::AttrToPath { fk_path, attr_name } => {
                    let (domain, _) = source.attribute(edge_name)?;
                    let path = Path {
                        start: mapping.node_image(domain)?.to_string(),
                        edges: fk_path.clone(),
                    };
                    query.map_attribute(edge_name, AttributeImage::Read {
                        selector: Selector::Path(path),
                        attribute: attr_name.clone(),
                    });
                }
            }
        }
        Ok(query)
    }

    pub fn object_image(&self, entity: &str) -> MigrateResult<&ObjectImage> {
        self.objects.get(entity).ok_or_else(|| {
            MigrateError::MalformedMapping(format!(
                "query '{}' has no image for entity '{}'",
                self.name, entity
            ))
        })
    }

    /// Vérifie que la requête est bien typée de `source` (S) vers `target` (T).
    pub fn validate(&self, source: &Schema, target: &Schema) -> MigrateResult<()> {
        if self.source_schema_name != source.name || self.target_schema_name != target.name {
            return Err(MigrateError::SchemaMismatch(format!(
                "query '{}' goes {} -> {}, got schemas {} and {}",
                self.name, self.source_schema_name, self.target_schema_name, source.name, target.name
            )));
        }

        for entity in self.objects.keys() {
            source.require_node(entity)?;
        }
        for name in self.morphisms.keys().chain(self.attributes.keys()) {
            if !source.edges.contains_key(name) {
                return Err(MigrateError::SchemaMismatch(format!(
                    "query '{}' maps '{}' which does not exist in schema '{}'",
                    self.name, name, source.name
                )));
            }
        }

        for entity in source.nodes.keys() {
            match self.object_image(entity)? {
                ObjectImage::Plain(t) => target.require_node(t)?,
                ObjectImage::Join(diagram) => diagram.validate(target)?,
                ObjectImage::Case(diagram) => {
                    if !diagram.filters.is_empty() {
                        return Err(MigrateError::MalformedMapping(format!(
                            "case image of '{}' carries filters, which only apply to joins",
                            entity
                        )));
                    }
                    diagram.validate(target)?;
                }
            }
        }

        for edge in source.edges.values() {
            match edge {
                Edge::ForeignKey { name, source: dom, target: cod } => {
                    let image = self.morphisms.get(name).ok_or_else(|| {
                        MigrateError::MalformedMapping(format!(
                            "query '{}' has no image for foreign key '{}'",
                            self.name, name
                        ))
                    })?;
                    let from = SourceShape::of(self.object_image(dom)?);
                    let to = self.object_image(cod)?;
                    self.check_morphism(name, image, from, to, target, true)?;
                }
                Edge::Attribute { name, source: dom, target: ty } => {
                    let image = self.attributes.get(name).ok_or_else(|| {
                        MigrateError::MalformedMapping(format!(
                            "query '{}' has no image for attribute '{}'",
                            self.name, name
                        ))
                    })?;
                    let from = SourceShape::of(self.object_image(dom)?);
                    self.check_attribute(name, image, from, ty, target, true)?;
                }
            }
        }
        Ok(())
    }

    /// Type un sélecteur depuis une source ; retourne l'entité atteinte.
    fn check_selector<'t>(
        &self,
        name: &str,
        selector: &'t Selector,
        from: SourceShape<'_>,
        target: &'t Schema,
    ) -> MigrateResult<&'t str> {
        match (selector, from) {
            (Selector::Path(path), SourceShape::Row(entity)) => {
                if path.start != entity {
                    return Err(MigrateError::AritySizeMismatch(format!(
                        "'{}': path {} starts at '{}', expected '{}'",
                        name, path, path.start, entity
                    )));
                }
                target.path_target(path)
            }
            (Selector::Vertex { vertex, path }, SourceShape::Tuple(diagram)) => {
                let entity = diagram.entity_of(vertex)?;
                if path.start != entity {
                    return Err(MigrateError::AritySizeMismatch(format!(
                        "'{}': path {} starts at '{}', but vertex '{}' is a '{}'",
                        name, path, path.start, vertex, entity
                    )));
                }
                target.path_target(path)
            }
            (Selector::Path(_), SourceShape::Tuple(_)) => Err(MigrateError::MalformedMapping(format!(
                "'{}': a join row needs a vertex selector", name
            ))),
            (Selector::Vertex { .. }, SourceShape::Row(_)) => Err(MigrateError::MalformedMapping(format!(
                "'{}': a vertex selector needs a join row", name
            ))),
            (_, SourceShape::Case(_)) => Err(MigrateError::MalformedMapping(format!(
                "'{}': a case row must be dispatched on its case", name
            ))),
        }
    }

    fn check_morphism(
        &self,
        name: &str,
        image: &MorphismImage,
        from: SourceShape<'_>,
        to: &ObjectImage,
        target: &Schema,
        top_level: bool,
    ) -> MigrateResult<()> {
        let expect = |selector: &Selector, entity: &str| -> MigrateResult<()> {
            let reached = self.check_selector(name, selector, from, target)?;
            if reached != entity {
                return Err(MigrateError::AritySizeMismatch(format!(
                    "'{}': {} reaches '{}', expected '{}'",
                    name, selector, reached, entity
                )));
            }
            Ok(())
        };

        match (image, to) {
            (MorphismImage::Dispatch(arms), _) => {
                let SourceShape::Case(diagram) = from else {
                    return Err(MigrateError::MalformedMapping(format!(
                        "'{}': only a case row can be dispatched", name
                    )));
                };
                if !top_level {
                    return Err(MigrateError::MalformedMapping(format!(
                        "'{}': nested dispatch", name
                    )));
                }
                check_same_keys(name, diagram, arms.keys())?;
                for (case, arm) in arms {
                    let arm_shape = SourceShape::Row(diagram.entity_of(case)?);
                    self.check_morphism(name, arm, arm_shape, to, target, false)?;
                }
                Ok(())
            }
            (_, _) if matches!(from, SourceShape::Case(_)) => Err(MigrateError::MalformedMapping(format!(
                "'{}': a case row must be dispatched on its case", name
            ))),
            (MorphismImage::Select(selector), ObjectImage::Plain(entity)) => expect(selector, entity),
            (MorphismImage::Tuple(components), ObjectImage::Join(diagram)) => {
                check_same_keys(name, diagram, components.keys())?;
                for (vertex, selector) in components {
                    expect(selector, diagram.entity_of(vertex)?)?;
                }
                Ok(())
            }
            (MorphismImage::Inject { case, selector }, ObjectImage::Case(diagram)) => {
                expect(selector, diagram.entity_of(case)?)
            }
            (_, to) => Err(MigrateError::MalformedMapping(format!(
                "'{}': image does not match the {} codomain",
                name, to.kind()
            ))),
        }
    }

    fn check_attribute(
        &self,
        name: &str,
        image: &AttributeImage,
        from: SourceShape<'_>,
        ty: &BaseType,
        target: &Schema,
        top_level: bool,
    ) -> MigrateResult<()> {
        match image {
            AttributeImage::Dispatch(arms) => {
                let SourceShape::Case(diagram) = from else {
                    return Err(MigrateError::MalformedMapping(format!(
                        "'{}': only a case row can be dispatched", name
                    )));
                };
                if !top_level {
                    return Err(MigrateError::MalformedMapping(format!(
                        "'{}': nested dispatch", name
                    )));
                }
                check_same_keys(name, diagram, arms.keys())?;
                for (case, arm) in arms {
                    let arm_shape = SourceShape::Row(diagram.entity_of(case)?);
                    self.check_attribute(name, arm, arm_shape, ty, target, false)?;
                }
                Ok(())
            }
            AttributeImage::Read { selector, attribute } => {
                let entity = self.check_selector(name, selector, from, target)?;
                let (owner, attr_ty) = target.attribute(attribute)?;
                if owner != entity {
                    return Err(MigrateError::AritySizeMismatch(format!(
                        "'{}': attribute '{}' belongs to '{}', selector reaches '{}'",
                        name, attribute, owner, entity
                    )));
                }
                if attr_ty != ty {
                    return Err(MigrateError::AritySizeMismatch(format!(
                        "'{}' : {} is read from '{}' : {}",
                        name, ty, attribute, attr_ty
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Les clés d'une image (Tuple, Dispatch) doivent être exactement les
/// sommets du diagramme.
fn check_same_keys<'k>(
    name: &str,
    diagram: &Diagram,
    keys: impl Iterator<Item = &'k String>,
) -> MigrateResult<()> {
    let mut count = 0;
    for key in keys {
        diagram.entity_of(key)?;
        count += 1;
    }
    if count != diagram.vertices.len() {
        return Err(MigrateError::MalformedMapping(format!(
            "'{}': expected one entry per vertex of {}, got {}",
            name, diagram, count
        )));
    }
    Ok(())
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "query {} : {} -> {} = {{", self.name, self.source_schema_name, self.target_schema_name)?;
        for (entity, image) in &self.objects {
            match image {
                ObjectImage::Plain(t) => writeln!(f, "  {} -> {}", entity, t)?,
                ObjectImage::Join(d) => writeln!(f, "  {} -> join {}", entity, d)?,
                ObjectImage::Case(d) => writeln!(f, "  {} -> case {}", entity, d)?,
            }
        }
        for name in self.morphisms.keys() {
            writeln!(f, "  fk {}", name)?;
        }
        for name in self.attributes.keys() {
            writeln!(f, "  attr {}", name)?;
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
    use crate::core::typeside::BaseType;

    fn graph(name: &str) -> Schema {
        let mut s = Schema::new(name);
        s.add_node("E")
         .add_node("V")
         .add_fk("src", "E", "V")
         .add_fk("tgt", "E", "V")
         .add_attribute("label", "V", BaseType::String);
        s
    }

    fn two_paths() -> Query {
        let mut q = Query::new("Paths2", "Graph2", "Graph");
        q.map_object("V", ObjectImage::Plain("V".into()))
         .map_object("E", ObjectImage::Join(Diagram::new()
             .vertex("e1", "E")
             .vertex("e2", "E")
             .vertex("v", "V")
             .edge("e1", "v", Path::new("E", vec!["tgt"]))
             .edge("e2", "v", Path::new("E", vec!["src"]))))
         .map_morphism("src", MorphismImage::Select(Selector::at("e1", Path::new("E", vec!["src"]))))
         .map_morphism("tgt", MorphismImage::Select(Selector::at("e2", Path::new("E", vec!["tgt"]))))
         .map_attribute("label", AttributeImage::Read {
             selector: Selector::path("V", vec![]),
             attribute: "label".into(),
         });
        q
    }

    #[test]
    fn test_valid_join_query() {
        assert_eq!(two_paths().validate(&graph("Graph2"), &graph("Graph")), Ok(()));
    }

    #[test]
    fn test_selector_must_match_source_kind() {
        let mut q = two_paths();
        q.map_morphism("src", MorphismImage::Select(Selector::path("E", vec!["src"])));
        assert!(matches!(
            q.validate(&graph("Graph2"), &graph("Graph")),
            Err(MigrateError::MalformedMapping(_))
        ));
    }

    #[test]
    fn test_selector_must_reach_codomain() {
        let mut q = two_paths();
        q.map_morphism("src", MorphismImage::Select(Selector::at("e1", Path::identity("E"))));
        assert!(matches!(
            q.validate(&graph("Graph2"), &graph("Graph")),
            Err(MigrateError::AritySizeMismatch(_))
        ));
    }

    #[test]
    fn test_missing_vertex_in_selector() {
        let mut q = two_paths();
        q.map_morphism("src", MorphismImage::Select(Selector::at("e3", Path::new("E", vec!["src"]))));
        assert!(matches!(
            q.validate(&graph("Graph2"), &graph("Graph")),
            Err(MigrateError::MalformedMapping(_))
        ));
    }

    #[test]
    fn test_case_query_needs_dispatch() {
        let mut q = Query::new("Sym", "Graph2", "Graph");
        q.map_object("V", ObjectImage::Plain("V".into()))
         .map_object("E", ObjectImage::Case(Diagram::new().vertex("fwd", "E").vertex("rev", "E")))
         .map_morphism("src", MorphismImage::Dispatch(IndexMap::from([
             ("fwd".to_string(), MorphismImage::Select(Selector::path("E", vec!["src"]))),
             ("rev".to_string(), MorphismImage::Select(Selector::path("E", vec!["tgt"]))),
         ])))
         .map_morphism("tgt", MorphismImage::Select(Selector::path("E", vec!["tgt"])))
         .map_attribute("label", AttributeImage::Read {
             selector: Selector::path("V", vec![]),
             attribute: "label".into(),
         });
        assert!(matches!(
            q.validate(&graph("Graph2"), &graph("Graph")),
            Err(MigrateError::MalformedMapping(_))
        ));

        // Un bras manquant est aussi refusé
        q.map_morphism("tgt", MorphismImage::Dispatch(IndexMap::from([
            ("fwd".to_string(), MorphismImage::Select(Selector::path("E", vec!["tgt"]))),
        ])));
        assert!(matches!(
            q.validate(&graph("Graph2"), &graph("Graph")),
            Err(MigrateError::MalformedMapping(_))
        ));

        q.map_morphism("tgt", MorphismImage::Dispatch(IndexMap::from([
            ("fwd".to_string(), MorphismImage::Select(Selector::path("E", vec!["tgt"]))),
            ("rev".to_string(), MorphismImage::Select(Selector::path("E", vec!["src"]))),
        ])));
        assert_eq!(q.validate(&graph("Graph2"), &graph("Graph")), Ok(()));
    }

    #[test]
    fn test_unknown_source_generator() {
        let mut q = two_paths();
        q.map_morphism("weight", MorphismImage::Select(Selector::path("V", vec![])));
        assert!(matches!(
            q.validate(&graph("Graph2"), &graph("Graph")),
            Err(MigrateError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_from_mapping() {
        let s = graph("Graph");
        let q = Query::from_mapping(&Mapping::identity(&s), &s).unwrap();
        assert_eq!(q.validate(&s, &s), Ok(()));
        assert_eq!(q.objects["E"], ObjectImage::Plain("E".into()));
    }
}
