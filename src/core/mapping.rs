// =============================================================================
// MAPPING — Un foncteur entre deux Schemas (catégories)
// =============================================================================
//
// Un Mapping F : S → T est un FONCTEUR "simple" entre deux schémas :
//   - à chaque NŒUD de S, un NŒUD de T
//   - à chaque FK de S, un CHEMIN de FK de T
//   - à chaque ATTRIBUT de S, un chemin de FK de T suivi d'un attribut de T
//
// F doit respecter les domaines/codomaines : si fk : A → B, alors F(fk)
// va de F(A) à F(B). Et il doit respecter les équations de S : les deux
// côtés d'une équation de S doivent avoir des images parallèles dans T.
//
// L'égalité des images se décide par réécriture : on applique les
// équations de T, dans les deux sens, à toute sous-suite de générateurs
// qui part de la bonne entité. La recherche est bornée (longueur des
// chemins, nombre de chemins visités) ; au-delà, l'équation est refusée.
//
// Un même Mapping sert dans les deux sens :
//   Δ_F : Instance(T) → Instance(S)   (précomposition)
//   Σ_F : Instance(S) → Instance(T)   (extension de Kan à gauche)
//
// EXEMPLE :
//   F(Person) = User
//   F(friend_of) = buddy
//   F(name) = username
//
// =============================================================================

use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::error::{MigrateError, MigrateResult};
use super::schema::{Edge, Path, PathEnd, Schema};

/// Image d'une arête de S dans T.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EdgeMapping {
    /// FK mappée vers un chemin de FK dans le schéma cible
    FkToPath(Path),
    /// Attribut mappé vers un chemin (FK*) puis un attribut du schéma cible
    AttrToPath {
        /// Chemin de FK à suivre dans T avant d'atteindre l'attribut
        fk_path: Vec<String>,
        /// Nom de l'attribut final dans T
        attr_name: String,
    },
}

/// Un Mapping F : source_schema → target_schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub name: String,
    pub source_schema_name: String,
    pub target_schema_name: String,
    /// node_S → node_T
    pub node_mapping: IndexMap<String, String>,
    /// edge_name_S → image dans T
    pub edge_mapping: IndexMap<String, EdgeMapping>,
}

impl Mapping {
    pub fn new(name: &str, source: &str, target: &str) -> Self {
        Mapping {
            name: name.to_string(),
            source_schema_name: source.to_string(),
            target_schema_name: target.to_string(),
            node_mapping: IndexMap::new(),
            edge_mapping: IndexMap::new(),
        }
    }

    /// Le foncteur identité d'un schéma.
    pub fn identity(schema: &Schema) -> Self {
        let mut m = Mapping::new(&format!("id_{}", schema.name), &schema.name, &schema.name);
        for node in schema.nodes.keys() {
            m.map_node(node, node);
        }
        for edge in schema.edges.values() {
            match edge {
                Edge::ForeignKey { name, source, .. } => {
                    m.map_fk(name, Path::new(source, vec![name]));
                }
                Edge::Attribute { name, .. } => {
                    m.map_attr_direct(name, name);
                }
            }
        }
        m
    }

    /// F(node_source) = node_target
    pub fn map_node(&mut self, source: &str, target: &str) -> &mut Self {
        self.node_mapping.insert(source.to_string(), target.to_string());
        self
    }

    /// F(fk_source) = chemin de FK dans T.
    ///
    /// Un chemin vide est l'identité : la FK est "écrasée" parce que sa
    /// source et sa cible ont la même image.
    pub fn map_fk(&mut self, source_fk: &str, target_path: Path) -> &mut Self {
        self.edge_mapping.insert(source_fk.to_string(), EdgeMapping::FkToPath(target_path));
        self
    }

    /// F(attr_source) = fk_path puis attr_target
    pub fn map_attr(&mut self, source_attr: &str, fk_path: Vec<&str>, target_attr: &str) -> &mut Self {
        self.edge_mapping.insert(
            source_attr.to_string(),
            EdgeMapping::AttrToPath {
                fk_path: fk_path.into_iter().map(|s| s.to_string()).collect(),
                attr_name: target_attr.to_string(),
            },
        );
        self
    }

    /// F(attr_source) = attr_target, sur le même nœud image
    pub fn map_attr_direct(&mut self, source_attr: &str, target_attr: &str) -> &mut Self {
        self.map_attr(source_attr, vec![], target_attr)
    }

    /// Chaque nœud et arête de S est-il mappé ?
    pub fn is_complete(&self, source_schema: &Schema) -> bool {
        source_schema.nodes.keys().all(|n| self.node_mapping.contains_key(n))
            && source_schema.edges.keys().all(|e| self.edge_mapping.contains_key(e))
    }

    /// F(node)
    pub fn node_image(&self, node: &str) -> MigrateResult<&str> {
        self.node_mapping.get(node).map(String::as_str).ok_or_else(|| {
            MigrateError::MalformedMapping(format!(
                "mapping '{}' has no image for entity '{}'",
                self.name, node
            ))
        })
    }

    /// F(edge), sous forme de chemin complet de T (attribut final compris).
    pub fn edge_image(&self, edge: &str, source: &Schema) -> MigrateResult<Path> {
        let source_edge = source.edges.get(edge).ok_or_else(|| {
            MigrateError::SchemaMismatch(format!(
                "'{}' does not exist in schema '{}'",
                edge, source.name
            ))
        })?;
        let start = self.node_image(source_edge.source())?;
        match self.edge_mapping.get(edge) {
            Some(EdgeMapping::FkToPath(path)) => Ok(path.clone()),
            Some(EdgeMapping::AttrToPath { fk_path, attr_name }) => {
                let mut edges = fk_path.clone();
                edges.push(attr_name.clone());
                Ok(Path { start: start.to_string(), edges })
            }
            None => Err(MigrateError::MalformedMapping(format!(
                "mapping '{}' has no image for '{}'",
                self.name, edge
            ))),
        }
    }

    /// F(chemin) : concaténation des images des générateurs.
    pub fn translate_path(&self, path: &Path, source: &Schema) -> MigrateResult<Path> {
        let mut result = Path::identity(self.node_image(&path.start)?);
        for edge in &path.edges {
            result = result.compose(&self.edge_image(edge, source)?);
        }
        Ok(result)
    }

    /// Vérifie que le mapping est bien un foncteur S → T.
    ///
    /// - complet, et ne référence que des générateurs existants
    /// - chaque image de FK va de F(A) à F(B)
    /// - chaque image d'attribut arrive sur un attribut du même type
    /// - les équations de S ont des images parallèles dans T
    pub fn validate(&self, source: &Schema, target: &Schema) -> MigrateResult<()> {
        if self.source_schema_name != source.name || self.target_schema_name != target.name {
            return Err(MigrateError::SchemaMismatch(format!(
                "mapping '{}' goes {} -> {}, got schemas {} and {}",
                self.name, self.source_schema_name, self.target_schema_name, source.name, target.name
            )));
        }

        for (src_node, tgt_node) in &self.node_mapping {
            source.require_node(src_node)?;
            target.require_node(tgt_node)?;
        }
        for edge_name in self.edge_mapping.keys() {
            if !source.edges.contains_key(edge_name) {
                return Err(MigrateError::SchemaMismatch(format!(
                    "mapping '{}' maps '{}' which does not exist in schema '{}'",
                    self.name, edge_name, source.name
                )));
            }
        }
        if !self.is_complete(source) {
            return Err(MigrateError::MalformedMapping(format!(
                "mapping '{}' is not complete: some entities or edges of '{}' are not mapped",
                self.name, source.name
            )));
        }

        for (edge_name, edge) in &source.edges {
            let mapped_src = self.node_image(edge.source())?;
            match (edge, &self.edge_mapping[edge_name]) {
                (Edge::ForeignKey { target: tgt, .. }, EdgeMapping::FkToPath(path)) => {
                    let mapped_tgt = self.node_image(tgt)?;
                    target.check_path(path, mapped_src, mapped_tgt)?;
                }
                (Edge::Attribute { target: ty, .. }, EdgeMapping::AttrToPath { .. }) => {
                    let image = self.edge_image(edge_name, source)?;
                    match target.path_end(&image)? {
                        PathEnd::Value(image_ty) if image_ty == ty => {}
                        PathEnd::Value(image_ty) => {
                            return Err(MigrateError::AritySizeMismatch(format!(
                                "attribute '{}' : {} is mapped to {} : {}",
                                edge_name, ty, image, image_ty
                            )));
                        }
                        PathEnd::Entity(_) => {
                            return Err(MigrateError::AritySizeMismatch(format!(
                                "attribute '{}' is mapped to {} which is not an attribute path",
                                edge_name, image
                            )));
                        }
                    }
                }
                (Edge::ForeignKey { .. }, _) => {
                    return Err(MigrateError::MalformedMapping(format!(
                        "foreign key '{}' is mapped as an attribute", edge_name
                    )));
                }
                (Edge::Attribute { .. }, _) => {
                    return Err(MigrateError::MalformedMapping(format!(
                        "attribute '{}' is mapped as a foreign key", edge_name
                    )));
                }
            }
        }

        for eq in &source.path_equations {
            let lhs = self.translate_path(&eq.lhs, source)?;
            let rhs = self.translate_path(&eq.rhs, source)?;
            if target.path_end(&lhs)? != target.path_end(&rhs)? {
                return Err(MigrateError::NonFunctorial(format!(
                    "equation {} of '{}' is sent to non-parallel paths {} and {}",
                    eq, source.name, lhs, rhs
                )));
            }
            if !provably_equal(target, &lhs, &rhs) {
                return Err(MigrateError::NonFunctorial(format!(
                    "equation {} of '{}' is sent to {} and {}, which the equations of '{}' do not identify",
                    eq, source.name, lhs, rhs, target.name
                )));
            }
        }

        Ok(())
    }

    /// Composition : si `self` = F : S → T et `next` = G : T → U,
    /// retourne G∘F : S → U. `source` est S (il donne le domaine des
    /// attributs, d'où partent leurs chemins images).
    pub fn compose(&self, next: &Mapping, source: &Schema) -> MigrateResult<Mapping> {
        if self.target_schema_name != next.source_schema_name {
            return Err(MigrateError::SchemaMismatch(format!(
                "cannot compose '{}' ({} -> {}) with '{}' ({} -> {})",
                self.name, self.source_schema_name, self.target_schema_name,
                next.name, next.source_schema_name, next.target_schema_name
            )));
        }
        let mut composed = Mapping::new(
            &format!("{}_{}", next.name, self.name),
            &self.source_schema_name,
            &next.target_schema_name,
        );

        for (src, mid) in &self.node_mapping {
            composed.map_node(src, next.node_image(mid)?);
        }

        // G sur un chemin de FK de T : on concatène les images.
        let translate_fks = |start: &str, fks: &[String]| -> MigrateResult<Path> {
            let mut result = Path::identity(next.node_image(start)?);
            for fk in fks {
                match next.edge_mapping.get(fk) {
                    Some(EdgeMapping::FkToPath(p)) => result = result.compose(p),
                    _ => {
                        return Err(MigrateError::MalformedMapping(format!(
                            "mapping '{}' has no foreign key image for '{}'",
                            next.name, fk
                        )))
                    }
                }
            }
            Ok(result)
        };

        for (edge, image) in &self.edge_mapping {
            match image {
                EdgeMapping::FkToPath(path) => {
                    let translated = translate_fks(path.start.as_str(), path.edges.as_slice())?;
                    composed.edge_mapping.insert(edge.clone(), EdgeMapping::FkToPath(translated));
                }
                EdgeMapping::AttrToPath { fk_path, attr_name } => {
                    let (domain, _) = source.attribute(edge)?;
                    let prefix = translate_fks(self.node_image(domain)?, fk_path.as_slice())?;
                    let (more_fks, final_attr) = match next.edge_mapping.get(attr_name) {
                        Some(EdgeMapping::AttrToPath { fk_path, attr_name }) => (fk_path, attr_name),
                        _ => {
                            return Err(MigrateError::MalformedMapping(format!(
                                "mapping '{}' has no attribute image for '{}'",
                                next.name, attr_name
                            )))
                        }
                    };
                    let mut fks = prefix.edges;
                    fks.extend(more_fks.iter().cloned());
                    composed.edge_mapping.insert(
                        edge.clone(),
                        EdgeMapping::AttrToPath { fk_path: fks, attr_name: final_attr.clone() },
                    );
                }
            }
        }
        Ok(composed)
    }
}

/// Nombre maximal de chemins explorés pour identifier deux images.
const MAX_REWRITES: usize = 4096;

/// `lhs` et `rhs` (deux chemins parallèles de `schema`) sont-ils égaux
/// modulo les équations de `schema` ?
fn provably_equal(schema: &Schema, lhs: &Path, rhs: &Path) -> bool {
    if lhs.edges == rhs.edges {
        return true;
    }
    let rules: Vec<(&[String], &[String], &str)> = schema.path_equations.iter()
        .flat_map(|eq| [
            (eq.lhs.edges.as_slice(), eq.rhs.edges.as_slice(), eq.lhs.start.as_str()),
            (eq.rhs.edges.as_slice(), eq.lhs.edges.as_slice(), eq.lhs.start.as_str()),
        ])
        .collect();
    let longest = rules.iter().map(|(_, to, _)| to.len()).max().unwrap_or(0);
    let max_len = lhs.len().max(rhs.len()) + longest;

    let mut seen: HashSet<Vec<String>> = HashSet::from([lhs.edges.clone()]);
    let mut queue: VecDeque<Vec<String>> = VecDeque::from([lhs.edges.clone()]);
    while let Some(edges) = queue.pop_front() {
        let stops = entities_along(schema, &lhs.start, &edges);
        for &(from, to, start) in &rules {
            if from.len() > edges.len() {
                continue;
            }
            for i in 0..=edges.len() - from.len() {
                if stops[i] != Some(start) || edges[i..i + from.len()] != *from {
                    continue;
                }
                let mut next = edges[..i].to_vec();
                next.extend_from_slice(to);
                next.extend_from_slice(&edges[i + from.len()..]);
                if next == rhs.edges {
                    return true;
                }
                if next.len() <= max_len && seen.len() < MAX_REWRITES && seen.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
    }
    false
}

/// L'entité atteinte avant chaque générateur (et après le dernier) ;
/// `None` après un attribut.
fn entities_along<'s>(schema: &'s Schema, start: &'s str, edges: &[String]) -> Vec<Option<&'s str>> {
    let mut stops = Vec::with_capacity(edges.len() + 1);
    let mut current = Some(start);
    stops.push(current);
    for edge in edges {
        current = current.and_then(|_| schema.fk(edge).ok().map(|(_, target)| target));
        stops.push(current);
    }
    stops
}

impl std::fmt::Display for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "mapping {} : {} -> {} = {{", self.name, self.source_schema_name, self.target_schema_name)?;

        writeln!(f, "  entities")?;
        for (src, tgt) in &self.node_mapping {
            writeln!(f, "    {} -> {}", src, tgt)?;
        }

        writeln!(f, "  edges")?;
        for (src, mapping) in &self.edge_mapping {
            match mapping {
                EdgeMapping::FkToPath(path) => {
                    writeln!(f, "    {} -> {}", src, path)?;
                }
                EdgeMapping::AttrToPath { fk_path, attr_name } => {
                    if fk_path.is_empty() {
                        writeln!(f, "    {} -> {}", src, attr_name)?;
                    } else {
                        writeln!(f, "    {} -> {}.{}", src, fk_path.join("."), attr_name)?;
                    }
                }
            }
        }

        write!(f, "}}")
    }
}
