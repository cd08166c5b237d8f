// =============================================================================
// SCHEMA — La catégorie finiment présentée qui décrit la structure
// =============================================================================
//
// Un Schema est une présentation de catégorie :
//   - les OBJETS sont les entités (tables)
//   - les MORPHISMES générateurs sont de deux sortes :
//       1. Foreign Keys : entité → entité
//       2. Attributs    : entité → type de base (objet-type)
//   - les ÉQUATIONS DE CHEMINS quotientent la catégorie libre engendrée.
//
// EXEMPLE :
//
//   Employee ──works_in──▶ Department
//      │                        │
//      │emp_name                │dept_name
//      ▼                        ▼
//    String                   String
//
// Un CHEMIN est une composition de générateurs ; le chemin vide est
// l'identité. La composition est associative et l'identité est neutre :
// tous les moteurs s'appuient sur ce fait sans le revérifier, c'est
// pourquoi un chemin est simplement une liste plate de générateurs.
//
// Un schéma est immuable une fois construit : les moteurs le reçoivent
// toujours par référence, il n'existe aucun registre global.
//
// =============================================================================

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::error::{MigrateError, MigrateResult};
use super::typeside::BaseType;

/// Un nœud dans la catégorie-schéma = une entité = une table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
}

impl Node {
    pub fn new(name: &str) -> Self {
        Node { name: name.to_string() }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Un morphisme générateur du schéma.
///
/// - **ForeignKey** : relie deux entités, c'est une fonction entre
///   ensembles de lignes dans toute instance.
/// - **Attribute** : relie une entité à un type de base, c'est une
///   fonction des lignes vers des valeurs brutes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Edge {
    ForeignKey {
        name: String,
        source: String,
        target: String,
    },
    Attribute {
        name: String,
        source: String,
        target: BaseType,
    },
}

impl Edge {
    pub fn fk(name: &str, source: &str, target: &str) -> Self {
        Edge::ForeignKey {
            name: name.to_string(),
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    pub fn attr(name: &str, source: &str, target: BaseType) -> Self {
        Edge::Attribute {
            name: name.to_string(),
            source: source.to_string(),
            target,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Edge::ForeignKey { name, .. } => name,
            Edge::Attribute { name, .. } => name,
        }
    }

    /// Nom de l'entité source (le domaine)
    pub fn source(&self) -> &str {
        match self {
            Edge::ForeignKey { source, .. } => source,
            Edge::Attribute { source, .. } => source,
        }
    }

    pub fn is_fk(&self) -> bool {
        matches!(self, Edge::ForeignKey { .. })
    }
}

/// Un chemin dans la catégorie = une séquence de générateurs composés.
///
/// `Path { start: "Employee", edges: ["works_in", "dept_name"] }` est le
/// morphisme composé `dept_name ∘ works_in : Employee → String`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path {
    /// Nœud de départ du chemin
    pub start: String,
    /// Séquence des noms d'arêtes à traverser
    pub edges: Vec<String>,
}

impl Path {
    pub fn new(start: &str, edges: Vec<&str>) -> Self {
        Path {
            start: start.to_string(),
            edges: edges.into_iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Chemin identité (ne traverse aucune arête)
    pub fn identity(node: &str) -> Self {
        Path {
            start: node.to_string(),
            edges: vec![],
        }
    }

    /// Compose deux chemins (le second commence là où le premier finit).
    /// Si f: A→B et g: B→C, alors `f.compose(g)` = g∘f : A→C
    pub fn compose(&self, other: &Path) -> Self {
        let mut edges = self.edges.clone();
        edges.extend(other.edges.iter().cloned());
        Path {
            start: self.start.clone(),
            edges,
        }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.edges.is_empty()
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.edges.is_empty() {
            write!(f, "id_{}", self.start)
        } else {
            write!(f, "{}.{}", self.start, self.edges.join("."))
        }
    }
}

/// Équation de chemins : deux chemins parallèles qui doivent être égaux.
///
/// Les deux côtés partent du même nœud. Le dernier générateur peut être
/// un attribut (équation d'observation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEquation {
    pub lhs: Path,
    pub rhs: Path,
}

impl PathEquation {
    pub fn new(lhs: Path, rhs: Path) -> Self {
        PathEquation { lhs, rhs }
    }
}

impl std::fmt::Display for PathEquation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}", self.lhs, self.rhs)
    }
}

/// Cible d'un chemin typé : une entité, ou un type de base si le chemin
/// se termine par un attribut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathEnd<'a> {
    Entity(&'a str),
    Value(&'a BaseType),
}

/// Le Schema complet : une catégorie finiment présentée.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    /// Les nœuds (entités), dans l'ordre de déclaration
    pub nodes: IndexMap<String, Node>,
    /// Les arêtes (FK + attributs), dans l'ordre de déclaration
    pub edges: IndexMap<String, Edge>,
    pub path_equations: Vec<PathEquation>,
}

impl Schema {
    pub fn new(name: &str) -> Self {
        Schema {
            name: name.to_string(),
            nodes: IndexMap::new(),
            edges: IndexMap::new(),
            path_equations: Vec::new(),
        }
    }

    pub fn add_node(&mut self, name: &str) -> &mut Self {
        self.nodes.insert(name.to_string(), Node::new(name));
        self
    }

    /// Ajoute une Foreign Key (arête entre entités)
    pub fn add_fk(&mut self, name: &str, source: &str, target: &str) -> &mut Self {
        assert!(self.nodes.contains_key(source),
            "Nœud source '{}' n'existe pas dans le schéma", source);
        assert!(self.nodes.contains_key(target),
            "Nœud cible '{}' n'existe pas dans le schéma", target);
        self.edges.insert(name.to_string(), Edge::fk(name, source, target));
        self
    }

    /// Ajoute un attribut (arête vers un type de base)
    pub fn add_attribute(&mut self, name: &str, source: &str, ty: BaseType) -> &mut Self {
        assert!(self.nodes.contains_key(source),
            "Nœud source '{}' n'existe pas dans le schéma", source);
        self.edges.insert(name.to_string(), Edge::attr(name, source, ty));
        self
    }

    pub fn add_path_equation(&mut self, lhs: Path, rhs: Path) -> &mut Self {
        self.path_equations.push(PathEquation::new(lhs, rhs));
        self
    }

    /// Toutes les Foreign Keys, dans l'ordre de déclaration
    pub fn foreign_keys(&self) -> Vec<&Edge> {
        self.edges.values().filter(|e| e.is_fk()).collect()
    }

    /// Tous les attributs, dans l'ordre de déclaration
    pub fn attributes(&self) -> Vec<&Edge> {
        self.edges.values().filter(|e| !e.is_fk()).collect()
    }

    /// Les arêtes sortant d'un nœud donné
    pub fn edges_from(&self, node_name: &str) -> Vec<&Edge> {
        self.edges.values()
            .filter(|e| e.source() == node_name)
            .collect()
    }

    /// Le générateur FK `name` : (source, cible).
    pub fn fk(&self, name: &str) -> MigrateResult<(&str, &str)> {
        match self.edges.get(name) {
            Some(Edge::ForeignKey { source, target, .. }) => Ok((source, target)),
            Some(Edge::Attribute { .. }) => Err(MigrateError::AritySizeMismatch(format!(
                "'{}' is an attribute of schema '{}', expected a foreign key",
                name, self.name
            ))),
            None => Err(MigrateError::SchemaMismatch(format!(
                "foreign key '{}' does not exist in schema '{}'",
                name, self.name
            ))),
        }
    }

    /// Le générateur attribut `name` : (source, type).
    pub fn attribute(&self, name: &str) -> MigrateResult<(&str, &BaseType)> {
        match self.edges.get(name) {
            Some(Edge::Attribute { source, target, .. }) => Ok((source, target)),
            Some(Edge::ForeignKey { .. }) => Err(MigrateError::AritySizeMismatch(format!(
                "'{}' is a foreign key of schema '{}', expected an attribute",
                name, self.name
            ))),
            None => Err(MigrateError::SchemaMismatch(format!(
                "attribute '{}' does not exist in schema '{}'",
                name, self.name
            ))),
        }
    }

    /// Vérifie qu'un nœud existe.
    pub fn require_node(&self, name: &str) -> MigrateResult<()> {
        if self.nodes.contains_key(name) {
            Ok(())
        } else {
            Err(MigrateError::SchemaMismatch(format!(
                "entity '{}' does not exist in schema '{}'",
                name, self.name
            )))
        }
    }

    /// Type un chemin de FK : retourne l'entité d'arrivée.
    ///
    /// Échoue si un générateur n'existe pas (SchemaMismatch) ou si deux
    /// générateurs consécutifs ne se composent pas (AritySizeMismatch).
    pub fn path_target<'a>(&'a self, path: &'a Path) -> MigrateResult<&'a str> {
        match self.path_end(path)? {
            PathEnd::Entity(entity) => Ok(entity),
            PathEnd::Value(_) => Err(MigrateError::AritySizeMismatch(format!(
                "path {} ends in an attribute, expected an entity",
                path
            ))),
        }
    }

    /// Type un chemin dont le dernier générateur peut être un attribut.
    pub fn path_end<'a>(&'a self, path: &'a Path) -> MigrateResult<PathEnd<'a>> {
        self.require_node(&path.start)?;
        let mut current = path.start.as_str();

        for (i, edge_name) in path.edges.iter().enumerate() {
            let edge = self.edges.get(edge_name).ok_or_else(|| {
                MigrateError::SchemaMismatch(format!(
                    "path {}: '{}' does not exist in schema '{}'",
                    path, edge_name, self.name
                ))
            })?;
            if edge.source() != current {
                return Err(MigrateError::AritySizeMismatch(format!(
                    "path {}: '{}' starts at '{}' but the path is at '{}'",
                    path, edge_name, edge.source(), current
                )));
            }
            match edge {
                Edge::ForeignKey { target, .. } => current = target,
                Edge::Attribute { target, .. } => {
                    if i + 1 != path.edges.len() {
                        return Err(MigrateError::AritySizeMismatch(format!(
                            "path {}: attribute '{}' must be the last generator",
                            path, edge_name
                        )));
                    }
                    return Ok(PathEnd::Value(target));
                }
            }
        }
        Ok(PathEnd::Entity(current))
    }

    /// Vérifie qu'un chemin va de `from` à `to`.
    pub fn check_path(&self, path: &Path, from: &str, to: &str) -> MigrateResult<()> {
        if path.start != from {
            return Err(MigrateError::AritySizeMismatch(format!(
                "path {} starts at '{}', expected '{}'",
                path, path.start, from
            )));
        }
        let end = self.path_target(path)?;
        if end != to {
            return Err(MigrateError::AritySizeMismatch(format!(
                "path {} ends at '{}', expected '{}'",
                path, end, to
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "schema {} = literal {{", self.name)?;

        writeln!(f, "  entities")?;
        for node in self.nodes.keys() {
            writeln!(f, "    {}", node)?;
        }

        let fks = self.foreign_keys();
        if !fks.is_empty() {
            writeln!(f, "  foreign_keys")?;
            for fk in fks {
                if let Edge::ForeignKey { name, source, target } = fk {
                    writeln!(f, "    {} : {} -> {}", name, source, target)?;
                }
            }
        }

        let attrs = self.attributes();
        if !attrs.is_empty() {
            writeln!(f, "  attributes")?;
            for attr in attrs {
                if let Edge::Attribute { name, source, target } = attr {
                    writeln!(f, "    {} : {} -> {}", name, source, target)?;
                }
            }
        }

        if !self.path_equations.is_empty() {
            writeln!(f, "  path_equations")?;
            for eq in &self.path_equations {
                writeln!(f, "    {}", eq)?;
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

    fn company_schema() -> Schema {
        let mut s = Schema::new("Company");
        s.add_node("Employee")
         .add_node("Department")
         .add_fk("works_in", "Employee", "Department")
         .add_fk("manager", "Department", "Employee")
         .add_attribute("emp_name", "Employee", BaseType::String)
         .add_attribute("salary", "Employee", BaseType::Integer)
         .add_attribute("dept_name", "Department", BaseType::String);
        s
    }

    #[test]
    fn test_create_schema() {
        let s = company_schema();
        assert_eq!(s.nodes.len(), 2);
        assert_eq!(s.foreign_keys().len(), 2);
        assert_eq!(s.edges_from("Employee").iter().filter(|e| !e.is_fk()).count(), 2);
        let from_department: Vec<&str> = s.edges_from("Department").into_iter()
            .filter(|e| e.is_fk())
            .map(|e| e.name())
            .collect();
        assert_eq!(from_department, vec!["manager"]);
    }

    #[test]
    fn test_path_compose() {
        let p1 = Path::new("Employee", vec!["works_in"]);
        let p2 = Path::new("Department", vec!["manager"]);
        let composed = p1.compose(&p2);
        assert_eq!(composed.edges, vec!["works_in", "manager"]);
        assert_eq!(format!("{}", composed), "Employee.works_in.manager");
        assert_eq!(format!("{}", Path::identity("Employee")), "id_Employee");
    }

    #[test]
    fn test_path_target() {
        let s = company_schema();
        let p = Path::new("Employee", vec!["works_in", "manager", "works_in"]);
        assert_eq!(s.path_target(&p).unwrap(), "Department");
        assert_eq!(s.path_target(&Path::identity("Employee")).unwrap(), "Employee");
        assert!(s.check_path(&p, "Employee", "Department").is_ok());
    }

    #[test]
    fn test_path_end_attribute() {
        let s = company_schema();
        let p = Path::new("Employee", vec!["works_in", "dept_name"]);
        assert_eq!(s.path_end(&p).unwrap(), PathEnd::Value(&BaseType::String));
        assert!(matches!(s.path_target(&p), Err(MigrateError::AritySizeMismatch(_))));
    }

    #[test]
    fn test_path_typing_errors() {
        let s = company_schema();
        let unknown = Path::new("Employee", vec!["reports_to"]);
        assert!(matches!(s.path_target(&unknown), Err(MigrateError::SchemaMismatch(_))));

        let misaligned = Path::new("Employee", vec!["manager"]);
        assert!(matches!(s.path_target(&misaligned), Err(MigrateError::AritySizeMismatch(_))));

        let attr_in_middle = Path::new("Employee", vec!["emp_name", "works_in"]);
        assert!(matches!(s.path_end(&attr_in_middle), Err(MigrateError::AritySizeMismatch(_))));
    }

    #[test]
    fn test_schema_display() {
        let s = company_schema();
        let display = format!("{}", s);
        assert!(display.contains("schema Company"));
        assert!(display.contains("works_in : Employee -> Department"));
        assert!(display.contains("salary : Employee -> Int"));
    }
}
