// =============================================================================
// SIGMA — Migration par poussée (extension de Kan à gauche)
// =============================================================================
//
// Étant donné un Mapping F : C → D et une instance X de C, Σ_F(X) est
// l'instance de D "la plus libre" qui reçoit X le long de F :
//
//   1. SEMER     : chaque ligne x de X(c) donne un nœud de Y(F(c))
//   2. PROPAGER  : pour h : c1 → c2, le nœud de x doit aller, par F(h),
//                  sur le nœud de X(h)(x). Si F(h) est un chemin long, les
//                  nœuds intermédiaires sont créés au passage.
//   3. QUOTIENTER: union-find avec clôture de congruence. Si deux nœuds
//                  fusionnent, leurs successeurs par une même FK fusionnent
//                  aussi. Les équations de D sont closes de la même façon.
//   4. FINALISER : chaque classe devient une ligne de Y.
//
// EXEMPLE — deux entités poussées sur une seule :
//
//   C : Left ──┐            D : Vertex
//   C : Right ─┴──F──▶
//
//   Y(Vertex) = X(Left) ⊔ X(Right)   (aucune fusion sans relation)
//
// Un seul écrivain : le quotient est une structure séquentielle.
//
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace};

use super::error::{MigrateError, MigrateResult};
use super::instance::{Instance, RowId};
use super::mapping::{EdgeMapping, Mapping};
use super::schema::{Edge, Path, PathEnd, Schema};
use super::typeside::Value;
use super::union_find::UnionFind;

/// Nœuds poussés dans D, quotientés au fil de l'eau.
///
/// `succ` et `attrs` ne sont à jour que sur les racines.
#[derive(Debug, Default)]
struct Quotient {
    uf: UnionFind,
    entity: Vec<String>,
    succ: Vec<BTreeMap<String, usize>>,
    attrs: Vec<BTreeMap<String, Value>>,
    pending: Vec<(usize, usize)>,
    merges: usize,
}

impl Quotient {
    fn node(&mut self, entity: &str) -> usize {
        let id = self.uf.push();
        self.entity.push(entity.to_string());
        self.succ.push(BTreeMap::new());
        self.attrs.push(BTreeMap::new());
        id
    }

    fn successor(&mut self, node: usize, fk: &str) -> Option<usize> {
        let root = self.uf.find(node);
        self.succ[root].get(fk).copied()
    }

    /// fk(node) = target. Une image déjà connue est fusionnée avec `target`.
    fn set_fk(&mut self, node: usize, fk: &str, target: usize) {
        let root = self.uf.find(node);
        match self.succ[root].get(fk) {
            Some(&existing) => self.pending.push((existing, target)),
            None => {
                self.succ[root].insert(fk.to_string(), target);
            }
        }
    }

    fn set_attr(&mut self, node: usize, attr: &str, value: Value) -> MigrateResult<()> {
        let root = self.uf.find(node);
        match self.attrs[root].get(attr) {
            Some(existing) if *existing != value => Err(MigrateError::NonFunctorial(format!(
                "a row of '{}' would carry both {} and {} for '{}'",
                self.entity[root], existing, value, attr
            ))),
            Some(_) => Ok(()),
            None => {
                self.attrs[root].insert(attr.to_string(), value);
                Ok(())
            }
        }
    }

    /// Vide la file des fusions jusqu'au point fixe de congruence.
    fn settle(&mut self) -> MigrateResult<()> {
        while let Some((a, b)) = self.pending.pop() {
            let Some((root, child)) = self.uf.union(a, b) else { continue };
            self.merges += 1;
            for (fk, next) in std::mem::take(&mut self.succ[child]) {
                self.set_fk(root, &fk, next);
            }
            for (attr, value) in std::mem::take(&mut self.attrs[child]) {
                self.set_attr(root, &attr, value)?;
            }
        }
        Ok(())
    }

    /// Suit un chemin de FK en créant les nœuds manquants.
    fn walk(&mut self, node: usize, edges: &[String], schema: &Schema) -> MigrateResult<usize> {
        let mut current = node;
        for fk in edges {
            current = match self.successor(current, fk) {
                Some(next) => next,
                None => {
                    let (_, target) = schema.fk(fk)?;
                    let next = self.node(target);
                    self.set_fk(current, fk, next);
                    next
                }
            };
        }
        Ok(current)
    }

    /// Suit un chemin de FK sans rien créer.
    fn follow(&mut self, node: usize, edges: &[String]) -> Option<usize> {
        let mut current = node;
        for fk in edges {
            current = self.successor(current, fk)?;
        }
        Some(self.uf.find(current))
    }

    fn attr_at(&mut self, node: usize, prefix: &[String], attr: &str) -> (Option<usize>, Option<Value>) {
        let Some(at) = self.follow(node, prefix) else { return (None, None) };
        let value = self.attrs[at].get(attr).cloned();
        (Some(at), value)
    }

    /// Un passage de clôture sur les équations de D. Retourne `true` si
    /// quelque chose a changé.
    fn close_equations(&mut self, schema: &Schema) -> MigrateResult<bool> {
        let mut changed = false;
        for eq in &schema.path_equations {
            let ends_in_value = matches!(schema.path_end(&eq.lhs)?, PathEnd::Value(_));
            let mut roots = Vec::new();
            for n in 0..self.uf.len() {
                if self.uf.find(n) == n && self.entity[n] == eq.lhs.start {
                    roots.push(n);
                }
            }
            for n in roots {
                changed |= if ends_in_value {
                    self.close_value_equation(n, &eq.lhs, &eq.rhs)?
                } else {
                    self.close_row_equation(n, &eq.lhs, &eq.rhs)
                };
            }
            self.settle()?;
        }
        Ok(changed)
    }

    fn close_row_equation(&mut self, n: usize, lhs: &Path, rhs: &Path) -> bool {
        match (self.follow(n, &lhs.edges), self.follow(n, &rhs.edges)) {
            (Some(a), Some(b)) if a != b => {
                self.pending.push((a, b));
                true
            }
            (Some(_), Some(_)) | (None, None) => false,
            (Some(a), None) => self.complete(n, &rhs.edges, a),
            (None, Some(b)) => self.complete(n, &lhs.edges, b),
        }
    }

    /// Définit le dernier pas d'un chemin dont seul ce pas manque.
    fn complete(&mut self, n: usize, edges: &[String], to: usize) -> bool {
        let Some((last, prefix)) = edges.split_last() else { return false };
        match self.follow(n, prefix) {
            Some(at) => {
                self.set_fk(at, last, to);
                true
            }
            None => false,
        }
    }

    fn close_value_equation(&mut self, n: usize, lhs: &Path, rhs: &Path) -> MigrateResult<bool> {
        let (Some((l_attr, l_prefix)), Some((r_attr, r_prefix))) = (lhs.edges.split_last(), rhs.edges.split_last())
        else {
            return Ok(false);
        };
        let (l_node, l_value) = self.attr_at(n, l_prefix, l_attr);
        let (r_node, r_value) = self.attr_at(n, r_prefix, r_attr);
        match (l_value, r_value) {
            (Some(a), Some(b)) if a != b => Err(MigrateError::NonFunctorial(format!(
                "equation {} = {} gives {} and {} on a row of '{}'",
                lhs, rhs, a, b, lhs.start
            ))),
            (Some(_), Some(_)) | (None, None) => Ok(false),
            (Some(a), None) => match r_node {
                Some(at) => self.set_attr(at, r_attr, a).map(|_| true),
                None => Ok(false),
            },
            (None, Some(b)) => match l_node {
                Some(at) => self.set_attr(at, l_attr, b).map(|_| true),
                None => Ok(false),
            },
        }
    }
}

/// Σ_F(X) : une instance fraîche de `target`.
///
/// Le mapping est supposé validé (`Mapping::validate`).
pub fn sigma(
    mapping: &Mapping,
    source: &Schema,
    target: &Schema,
    instance: &Instance,
) -> MigrateResult<Instance> {
    let mut q = Quotient::default();

    // 1. Semer
    let mut seeds: HashMap<(&str, RowId), usize> = HashMap::new();
    for entity in source.nodes.keys() {
        let image = mapping.node_image(entity)?;
        for row in instance.entity(entity)?.row_ids() {
            seeds.insert((entity.as_str(), row), q.node(image));
        }
    }
    debug!(mapping = %mapping.name, seeds = seeds.len(), "sigma: seeded");

    // 2. Propager
    for edge in source.edges.values() {
        let entity = edge.source();
        for row in instance.entity(entity)?.row_ids() {
            let seed = seed_of(&seeds, entity, row)?;
            match (edge, mapping.edge_mapping.get(edge.name())) {
                (Edge::ForeignKey { name, target: fk_target, .. }, Some(EdgeMapping::FkToPath(path))) => {
                    let to = seed_of(&seeds, fk_target, instance.fk_value(entity, row, name)?)?;
                    match path.edges.split_last() {
                        None => q.pending.push((seed, to)),
                        Some((last, prefix)) => {
                            let at = q.walk(seed, prefix, target)?;
                            q.set_fk(at, last, to);
                        }
                    }
                }
                (Edge::Attribute { name, .. }, Some(EdgeMapping::AttrToPath { fk_path, attr_name })) => {
                    let value = instance.attr_value(entity, row, name)?.clone();
                    let at = q.walk(seed, fk_path, target)?;
                    q.set_attr(at, attr_name, value)?;
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
        q.settle()?;
    }
    trace!(nodes = q.uf.len(), merges = q.merges, "sigma: propagated");

    // 3. Quotienter par les équations de D
    let mut rounds = 0;
    loop {
        rounds += 1;
        if !q.close_equations(target)? {
            break;
        }
    }
    debug!(nodes = q.uf.len(), merges = q.merges, rounds, "sigma: fixpoint reached");

    // 4. Finaliser
    finalize(&mut q, mapping, target)
}

fn seed_of(seeds: &HashMap<(&str, RowId), usize>, entity: &str, row: RowId) -> MigrateResult<usize> {
    seeds.get(&(entity, row)).copied().ok_or_else(|| MigrateError::MissingValue {
        entity: entity.to_string(),
        row,
        edge: "(row)".to_string(),
    })
}

/// Les classes deviennent des lignes, numérotées par entité dans l'ordre
/// de création de leur premier nœud.
fn finalize(q: &mut Quotient, mapping: &Mapping, target: &Schema) -> MigrateResult<Instance> {
    let mut result = Instance::new(&format!("sigma_{}", mapping.name), target);
    let mut row_of: HashMap<usize, RowId> = HashMap::new();
    let mut roots = Vec::new();
    for n in 0..q.uf.len() {
        let root = q.uf.find(n);
        if !row_of.contains_key(&root) {
            let row = result.entity_mut(&q.entity[root])?.push_row();
            row_of.insert(root, row);
            roots.push(root);
        }
    }

    for root in roots {
        let entity = q.entity[root].clone();
        let row = row_of[&root];
        for edge in target.edges_from(&entity) {
            match edge {
                Edge::ForeignKey { name, .. } => {
                    let next = q.successor(root, name).map(|n| q.uf.find(n));
                    let to = next.and_then(|n| row_of.get(&n).copied())
                        .ok_or_else(|| unreachable(name, &entity, row))?;
                    result.entity_mut(&entity)?.set_fk(row, name, to);
                }
                Edge::Attribute { name, .. } => {
                    let value = q.attrs[root].get(name).cloned()
                        .ok_or_else(|| unreachable(name, &entity, row))?;
                    result.entity_mut(&entity)?.set_attr(row, name, value);
                }
            }
        }
    }
    debug!(rows = result.total_rows(), "sigma: finalized");
    Ok(result)
}

fn unreachable(morphism: &str, entity: &str, row: RowId) -> MigrateError {
    MigrateError::UnreachableMorphism {
        morphism: morphism.to_string(),
        entity: entity.to_string(),
        row,
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::typeside::BaseType;
    use pretty_assertions::assert_eq;

    fn named(name: &str) -> [(String, Value); 1] {
        [("name".to_string(), Value::String(name.into()))]
    }

    #[test]
    fn test_sigma_bipartite_union() {
        let mut c = Schema::new("Bipartite");
        c.add_node("Left").add_node("Right");
        let mut d = Schema::new("Vertices");
        d.add_node("Vertex");
        let mut f = Mapping::new("Flatten", "Bipartite", "Vertices");
        f.map_node("Left", "Vertex").map_node("Right", "Vertex");
        assert_eq!(f.validate(&c, &d), Ok(()));

        let mut x = Instance::new("X", &c);
        for _ in 0..4 {
            x.insert("Left", [], []).unwrap();
        }
        for _ in 0..3 {
            x.insert("Right", [], []).unwrap();
        }

        let y = sigma(&f, &c, &d, &x).unwrap();
        assert_eq!(y.row_count("Vertex"), 7);
        assert_eq!(y.name, "sigma_Flatten");
    }

    /// A --f--> B, les deux écrasés sur V, f ↦ id
    fn collapse() -> (Schema, Schema, Mapping) {
        let mut c = Schema::new("Arrow");
        c.add_node("A")
         .add_node("B")
         .add_fk("f", "A", "B")
         .add_attribute("a_name", "A", BaseType::String)
         .add_attribute("b_name", "B", BaseType::String);
        let mut d = Schema::new("Point");
        d.add_node("V").add_attribute("name", "V", BaseType::String);
        let mut m = Mapping::new("Collapse", "Arrow", "Point");
        m.map_node("A", "V")
         .map_node("B", "V")
         .map_fk("f", Path::identity("V"))
         .map_attr_direct("a_name", "name")
         .map_attr_direct("b_name", "name");
        (c, d, m)
    }

    #[test]
    fn test_sigma_identifies_rows() {
        let (c, d, m) = collapse();
        assert_eq!(m.validate(&c, &d), Ok(()));

        let mut x = Instance::new("X", &c);
        let b = x.insert("B", [("b_name".to_string(), Value::String("hub".into()))], []).unwrap();
        x.insert("A", [("a_name".to_string(), Value::String("hub".into()))], [("f".to_string(), b)]).unwrap();
        x.insert("A", [("a_name".to_string(), Value::String("hub".into()))], [("f".to_string(), b)]).unwrap();

        let y = sigma(&m, &c, &d, &x).unwrap();
        assert_eq!(y.row_count("V"), 1);
        assert_eq!(y.attr_value("V", 1, "name").unwrap(), &Value::String("hub".into()));
    }

    #[test]
    fn test_sigma_attribute_conflict_is_non_functorial() {
        let (c, d, m) = collapse();
        let mut x = Instance::new("X", &c);
        let b = x.insert("B", [("b_name".to_string(), Value::String("hub".into()))], []).unwrap();
        x.insert("A", [("a_name".to_string(), Value::String("leaf".into()))], [("f".to_string(), b)]).unwrap();

        assert!(matches!(sigma(&m, &c, &d, &x), Err(MigrateError::NonFunctorial(_))));
    }

    #[test]
    fn test_sigma_merges_identical_floats() {
        let mut c = Schema::new("Arrow");
        c.add_node("A")
         .add_node("B")
         .add_fk("f", "A", "B")
         .add_attribute("a_weight", "A", BaseType::Float)
         .add_attribute("b_weight", "B", BaseType::Float);
        let mut d = Schema::new("Point");
        d.add_node("V").add_attribute("weight", "V", BaseType::Float);
        let mut m = Mapping::new("Collapse", "Arrow", "Point");
        m.map_node("A", "V")
         .map_node("B", "V")
         .map_fk("f", Path::identity("V"))
         .map_attr_direct("a_weight", "weight")
         .map_attr_direct("b_weight", "weight");

        let weighted = |attr: &str, w: f64| [(attr.to_string(), Value::Float(w))];
        let mut x = Instance::new("X", &c);
        let b = x.insert("B", weighted("b_weight", f64::NAN), []).unwrap();
        x.insert("A", weighted("a_weight", f64::NAN), [("f".to_string(), b)]).unwrap();

        let y = sigma(&m, &c, &d, &x).unwrap();
        assert_eq!(y.row_count("V"), 1);
        assert!(matches!(y.attr_value("V", 1, "weight").unwrap(), Value::Float(w) if w.is_nan()));

        // 0.0 et -0.0 sont deux valeurs distinctes
        let mut x = Instance::new("X", &c);
        let b = x.insert("B", weighted("b_weight", 0.0), []).unwrap();
        x.insert("A", weighted("a_weight", -0.0), [("f".to_string(), b)]).unwrap();
        assert!(matches!(sigma(&m, &c, &d, &x), Err(MigrateError::NonFunctorial(_))));
    }

    #[test]
    fn test_sigma_unreachable_morphism() {
        let mut c = Schema::new("One");
        c.add_node("A").add_attribute("name", "A", BaseType::String);
        let mut d = Schema::new("Two");
        d.add_node("V")
         .add_node("W")
         .add_fk("g", "V", "W")
         .add_attribute("name", "V", BaseType::String);
        let mut m = Mapping::new("Include", "One", "Two");
        m.map_node("A", "V").map_attr_direct("name", "name");
        assert_eq!(m.validate(&c, &d), Ok(()));

        // Aucune ligne : vacuement total
        let empty = Instance::new("Empty", &c);
        assert_eq!(sigma(&m, &c, &d, &empty).unwrap().total_rows(), 0);

        let mut x = Instance::new("X", &c);
        x.insert("A", named("solo"), []).unwrap();
        assert_eq!(
            sigma(&m, &c, &d, &x),
            Err(MigrateError::UnreachableMorphism {
                morphism: "g".into(),
                entity: "V".into(),
                row: 1,
            })
        );
    }

    #[test]
    fn test_sigma_long_path_creates_intermediates() {
        let mut c = Schema::new("Arrow");
        c.add_node("A").add_node("B").add_fk("h", "A", "B");
        let mut d = Schema::new("Chain");
        d.add_node("V")
         .add_node("M")
         .add_node("W")
         .add_fk("p", "V", "M")
         .add_fk("q", "M", "W");
        let mut m = Mapping::new("Stretch", "Arrow", "Chain");
        m.map_node("A", "V")
         .map_node("B", "W")
         .map_fk("h", Path::new("V", vec!["p", "q"]));
        assert_eq!(m.validate(&c, &d), Ok(()));

        let mut x = Instance::new("X", &c);
        let b = x.insert("B", [], []).unwrap();
        x.insert("A", [], [("h".to_string(), b)]).unwrap();
        x.insert("A", [], [("h".to_string(), b)]).unwrap();

        let y = sigma(&m, &c, &d, &x).unwrap();
        assert_eq!(y.row_count("V"), 2);
        assert_eq!(y.row_count("M"), 2);
        assert_eq!(y.row_count("W"), 1);
        assert_eq!(y.fk_value("M", 2, "q").unwrap(), 1);
        assert_eq!(y.fk_value("V", 2, "p").unwrap(), 2);
    }

    /// D : V ⇉ W avec p = q
    fn parallel_pair() -> Schema {
        let mut d = Schema::new("Pair");
        d.add_node("V")
         .add_node("W")
         .add_fk("p", "V", "W")
         .add_fk("q", "V", "W")
         .add_path_equation(Path::new("V", vec!["p"]), Path::new("V", vec!["q"]));
        d
    }

    #[test]
    fn test_sigma_equation_defines_missing_step() {
        let mut c = Schema::new("Arrow");
        c.add_node("A").add_node("B").add_fk("f", "A", "B");
        let d = parallel_pair();
        let mut m = Mapping::new("AlongP", "Arrow", "Pair");
        m.map_node("A", "V").map_node("B", "W").map_fk("f", Path::new("V", vec!["p"]));
        assert_eq!(m.validate(&c, &d), Ok(()));

        let mut x = Instance::new("X", &c);
        let b1 = x.insert("B", [], []).unwrap();
        let b2 = x.insert("B", [], []).unwrap();
        x.insert("A", [], [("f".to_string(), b2)]).unwrap();
        x.insert("A", [], [("f".to_string(), b1)]).unwrap();

        let y = sigma(&m, &c, &d, &x).unwrap();
        for row in [1, 2] {
            assert_eq!(y.fk_value("V", row, "q").unwrap(), y.fk_value("V", row, "p").unwrap());
        }
        assert_eq!(y.fk_value("V", 1, "q").unwrap(), 2);
    }

    #[test]
    fn test_sigma_equation_merges_rows() {
        let mut c = Schema::new("Span");
        c.add_node("A")
         .add_node("B")
         .add_fk("f", "A", "B")
         .add_fk("g", "A", "B");
        let d = parallel_pair();
        let mut m = Mapping::new("Glue", "Span", "Pair");
        m.map_node("A", "V")
         .map_node("B", "W")
         .map_fk("f", Path::new("V", vec!["p"]))
         .map_fk("g", Path::new("V", vec!["q"]));
        assert_eq!(m.validate(&c, &d), Ok(()));

        let mut x = Instance::new("X", &c);
        let b1 = x.insert("B", [], []).unwrap();
        let b2 = x.insert("B", [], []).unwrap();
        x.insert("B", [], []).unwrap();
        x.insert("A", [], [("f".to_string(), b1), ("g".to_string(), b2)]).unwrap();

        let y = sigma(&m, &c, &d, &x).unwrap();
        // b1 ~ b2, b3 reste seule
        assert_eq!(y.row_count("W"), 2);
        assert_eq!(y.fk_value("V", 1, "p").unwrap(), 1);
        assert_eq!(y.fk_value("V", 1, "q").unwrap(), 1);
    }
}
