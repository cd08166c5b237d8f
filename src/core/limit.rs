// =============================================================================
// LIMIT — Évaluation des requêtes : jointures (limites) et unions (colimites)
// =============================================================================
//
// Q : S → T, X une instance de T. On calcule Y = eval(Q, X), instance de S.
//
// PHASE 1 — les lignes de chaque entité de S :
//
//   Plain(c) : Y(d) = X(c), mêmes RowId (comme Δ)
//
//   Join(J)  : tous les tuples (une ligne par sommet) tels que, pour chaque
//              arête v1 → v2 de chemin p, X(p)(t[v1]) = t[v2].
//              Planification itérative, sans produit cartésien complet :
//
//                déterminé : arête v → w, v lié     → t[w] = X(p)(t[v])
//                sondé     : arête w → v, v lié     → index inverse de X(p)
//                balayé    : rien ne relie          → toutes les lignes de w
//
//              Après chaque liaison : filtrer par les arêtes et les filtres
//              d'attributs dont tous les sommets sont liés.
//              Les tuples sont triés, puis numérotés 1..n.
//
//   Case(J)  : l'union disjointe des X(v), étiquetée par le cas v. Les
//              arêtes v1 → v2 identifient x avec X(p)(x) (union-find).
//              Les classes sont numérotées dans l'ordre d'apparition
//              (cas dans l'ordre du diagramme, lignes croissantes).
//
// PHASE 2 — les FK et attributs de S, ligne par ligne, à partir de la
// provenance (ligne, tuple ou classe) de chaque ligne.
//
// Avec `EvalConfig::parallel`, chaque phase évalue les entités de S sur
// des threads distincts : X est figée, et chaque thread n'écrit que ses
// propres lignes.
//
// =============================================================================

use std::collections::HashMap;

use tracing::{debug, trace};

use super::config::EvalConfig;
use super::diagram::{AttributeRef, Diagram, Filter};
use super::error::{MigrateError, MigrateResult};
use super::instance::{Component, EntityData, Instance, RowId, RowLabel};
use super::query::{AttributeImage, MorphismImage, ObjectImage, Query, Selector};
use super::schema::{Edge, Path, Schema};
use super::typeside::{CompOp, Value};
use super::union_find::UnionFind;

/// Les lignes calculées pour une entité de S, avec leur provenance.
#[derive(Debug)]
enum ObjectRows<'q> {
    Plain(Vec<RowId>),
    Join {
        diagram: &'q Diagram,
        /// tuple i ↦ ligne i + 1
        tuples: Vec<Vec<RowId>>,
        index: HashMap<Vec<RowId>, RowId>,
    },
    Case {
        diagram: &'q Diagram,
        /// classe i ↦ ligne i + 1 ; le premier membre est canonique
        classes: Vec<Vec<(usize, RowId)>>,
        index: HashMap<(usize, RowId), RowId>,
    },
}

/// La provenance d'une ligne de Y, vue par les images de FK et d'attributs.
#[derive(Debug, Clone, Copy)]
enum RowContext<'r> {
    Row(RowId),
    Tuple(&'r Diagram, &'r [RowId]),
    Case(&'r Diagram, &'r [(usize, RowId)]),
}

impl<'q> ObjectRows<'q> {
    fn len(&self) -> usize {
        match self {
            ObjectRows::Plain(rows) => rows.len(),
            ObjectRows::Join { tuples, .. } => tuples.len(),
            ObjectRows::Case { classes, .. } => classes.len(),
        }
    }

    fn rows(&self) -> Vec<(RowId, RowContext<'_>)> {
        match self {
            ObjectRows::Plain(rows) => rows.iter().map(|&r| (r, RowContext::Row(r))).collect(),
            ObjectRows::Join { diagram, tuples, .. } => tuples.iter().zip(1..)
                .map(|(t, id)| (id, RowContext::Tuple(*diagram, t.as_slice())))
                .collect(),
            ObjectRows::Case { diagram, classes, .. } => classes.iter().zip(1..)
                .map(|(c, id)| (id, RowContext::Case(*diagram, c.as_slice())))
                .collect(),
        }
    }

    fn label(&self, ctx: RowContext<'_>) -> Option<RowLabel> {
        match ctx {
            RowContext::Row(_) => None,
            RowContext::Tuple(diagram, tuple) => Some(RowLabel::Tuple(
                diagram.vertices.iter().zip(tuple)
                    .map(|((vertex, entity), &row)| Component {
                        vertex: vertex.clone(),
                        entity: entity.clone(),
                        row,
                    })
                    .collect(),
            )),
            RowContext::Case(diagram, members) => {
                let &(arm, row) = members.first()?;
                let (vertex, entity) = diagram.vertices.get_index(arm)?;
                Some(RowLabel::Case(Component {
                    vertex: vertex.clone(),
                    entity: entity.clone(),
                    row,
                }))
            }
        }
    }
}

/// Évalue `query` sur `instance` (une instance de `target`), et retourne
/// une instance de `source`.
///
/// La requête est supposée validée (`Query::validate`).
pub fn eval_query(
    query: &Query,
    source: &Schema,
    target: &Schema,
    instance: &Instance,
    config: &EvalConfig,
) -> MigrateResult<Instance> {
    let entities: Vec<&str> = source.nodes.keys().map(String::as_str).collect();

    // Phase 1 : les lignes
    let computed = per_entity(&entities, config.parallel, |entity| {
        let rows = object_rows(query.object_image(entity)?, target, instance)?;
        debug!(entity, rows = rows.len(), "query: object evaluated");
        Ok(rows)
    })?;
    let objects: HashMap<&str, ObjectRows<'_>> = entities.iter().copied().zip(computed).collect();

    // Phase 2 : les FK et attributs
    let evaluator = Evaluator { query, source, target, instance, objects: &objects };
    let data = per_entity(&entities, config.parallel, |entity| evaluator.entity_data(entity))?;

    let mut result = Instance::new(&format!("eval_{}", query.name), source);
    for (entity, entity_data) in entities.iter().zip(data) {
        *result.entity_mut(entity)? = entity_data;
    }
    debug!(query = %query.name, rows = result.total_rows(), "query: evaluated");
    Ok(result)
}

/// Applique `f` à chaque entité, sur des threads distincts si demandé.
/// Les résultats sont rendus dans l'ordre des entités.
fn per_entity<'a, T, F>(entities: &[&'a str], parallel: bool, f: F) -> MigrateResult<Vec<T>>
where
    T: Send,
    F: Fn(&'a str) -> MigrateResult<T> + Sync,
{
    if !parallel || entities.len() < 2 {
        return entities.iter().map(|&entity| f(entity)).collect();
    }
    std::thread::scope(|scope| {
        let handles: Vec<_> = entities.iter()
            .map(|&entity| {
                let f = &f;
                scope.spawn(move || f(entity))
            })
            .collect();
        handles.into_iter()
            .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    })
}

fn object_rows<'q>(image: &'q ObjectImage, target: &Schema, x: &Instance) -> MigrateResult<ObjectRows<'q>> {
    match image {
        ObjectImage::Plain(entity) => Ok(ObjectRows::Plain(x.entity(entity)?.row_ids())),
        ObjectImage::Join(diagram) => {
            let tuples = join_tuples(diagram, target, x)?;
            let index = tuples.iter().cloned().zip(1..).collect();
            Ok(ObjectRows::Join { diagram, tuples, index })
        }
        ObjectImage::Case(diagram) => {
            let classes = case_classes(diagram, target, x)?;
            let index = classes.iter().zip(1..)
                .flat_map(|(members, id)| members.iter().map(move |&m| (m, id)))
                .collect();
            Ok(ObjectRows::Case { diagram, classes, index })
        }
    }
}

// =============================================================================
// JOIN — la limite d'un diagramme
// =============================================================================

/// Tous les tuples qui satisfont le diagramme, triés.
fn join_tuples(diagram: &Diagram, schema: &Schema, x: &Instance) -> MigrateResult<Vec<Vec<RowId>>> {
    let n = diagram.vertices.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let edges: Vec<(usize, usize, &Path)> = diagram.edges.iter()
        .map(|e| -> MigrateResult<_> {
            Ok((diagram.index_of(&e.source)?, diagram.index_of(&e.target)?, &e.path))
        })
        .collect::<MigrateResult<_>>()?;
    let filters: Vec<(Vec<usize>, &Filter)> = diagram.filters.iter()
        .map(|f| -> MigrateResult<_> {
            let vs = f.vertices().into_iter().map(|v| diagram.index_of(v)).collect::<MigrateResult<_>>()?;
            Ok((vs, f))
        })
        .collect::<MigrateResult<_>>()?;

    let mut bound = vec![false; n];
    let mut edge_done = vec![false; edges.len()];
    let mut filter_done = vec![false; filters.len()];
    let mut tuples: Vec<Vec<Option<RowId>>> = vec![vec![None; n]];

    for _ in 0..n {
        let determined = edges.iter().enumerate()
            .find(|(i, (s, t, _))| !edge_done[*i] && bound[*s] && !bound[*t]);
        let looked_up = edges.iter().enumerate()
            .find(|(i, (s, t, _))| !edge_done[*i] && !bound[*s] && bound[*t]);

        let vertex = if let Some((i, &(s, t, path))) = determined {
            trace!(vertex = t, via = %path, "join: determined");
            let mut next = Vec::with_capacity(tuples.len());
            for mut tuple in tuples {
                let from = tuple[s].ok_or_else(|| unbound(diagram, s))?;
                tuple[t] = Some(x.follow_path(schema, path, from)?);
                next.push(tuple);
            }
            tuples = next;
            edge_done[i] = true;
            t
        } else if let Some((i, &(s, t, path))) = looked_up {
            trace!(vertex = s, via = %path, "join: looked up");
            let mut inverse: HashMap<RowId, Vec<RowId>> = HashMap::new();
            for row in x.entity(&path.start)?.row_ids() {
                inverse.entry(x.follow_path(schema, path, row)?).or_default().push(row);
            }
            let mut next = Vec::new();
            for tuple in &tuples {
                let to = tuple[t].ok_or_else(|| unbound(diagram, t))?;
                for &row in inverse.get(&to).into_iter().flatten() {
                    let mut extended = tuple.clone();
                    extended[s] = Some(row);
                    next.push(extended);
                }
            }
            tuples = next;
            edge_done[i] = true;
            s
        } else {
            let Some(v) = bound.iter().position(|b| !b) else { break };
            let (_, entity) = diagram.vertices.get_index(v).ok_or_else(|| unbound(diagram, v))?;
            trace!(vertex = v, entity = %entity, "join: scanned");
            let rows = x.entity(entity)?.row_ids();
            let mut next = Vec::with_capacity(tuples.len() * rows.len());
            for tuple in &tuples {
                for &row in &rows {
                    let mut extended = tuple.clone();
                    extended[v] = Some(row);
                    next.push(extended);
                }
            }
            tuples = next;
            v
        };
        bound[vertex] = true;

        // Arêtes et filtres devenus vérifiables
        for (i, &(s, t, path)) in edges.iter().enumerate() {
            if edge_done[i] || !bound[s] || !bound[t] {
                continue;
            }
            let mut kept = Vec::with_capacity(tuples.len());
            for tuple in tuples {
                let from = tuple[s].ok_or_else(|| unbound(diagram, s))?;
                if Some(x.follow_path(schema, path, from)?) == tuple[t] {
                    kept.push(tuple);
                }
            }
            tuples = kept;
            edge_done[i] = true;
        }
        for (i, (vs, filter)) in filters.iter().enumerate() {
            if filter_done[i] || !vs.iter().all(|&v| bound[v]) {
                continue;
            }
            let mut kept = Vec::with_capacity(tuples.len());
            for tuple in tuples {
                if filter_holds(filter, diagram, schema, x, &tuple)? {
                    kept.push(tuple);
                }
            }
            tuples = kept;
            filter_done[i] = true;
        }

        if tuples.is_empty() {
            return Ok(Vec::new());
        }
    }

    let mut result: Vec<Vec<RowId>> = tuples.into_iter()
        .map(|t| t.into_iter().flatten().collect())
        .collect();
    result.sort();
    Ok(result)
}

fn unbound(diagram: &Diagram, v: usize) -> MigrateError {
    MigrateError::MalformedMapping(format!("vertex #{} of {} is not bound", v, diagram))
}

fn filter_holds(
    filter: &Filter,
    diagram: &Diagram,
    schema: &Schema,
    x: &Instance,
    tuple: &[Option<RowId>],
) -> MigrateResult<bool> {
    let read = |attr: &AttributeRef| -> MigrateResult<Value> {
        let v = diagram.index_of(&attr.vertex)?;
        let row = tuple[v].ok_or_else(|| unbound(diagram, v))?;
        let path = Path {
            start: diagram.entity_of(&attr.vertex)?.to_string(),
            edges: attr.fk_path.clone(),
        };
        x.read_attribute(schema, &path, &attr.attribute, row)
    };
    match filter {
        Filter::Compare { attr, op, value } => Ok(read(attr)?.compare(*op, value)),
        Filter::SameValue { left, right } => Ok(read(left)?.compare(CompOp::Eq, &read(right)?)),
    }
}

// =============================================================================
// CASE — la colimite d'un diagramme
// =============================================================================

/// Les classes de l'union disjointe, quotientée par les arêtes.
fn case_classes(diagram: &Diagram, schema: &Schema, x: &Instance) -> MigrateResult<Vec<Vec<(usize, RowId)>>> {
    let arms: Vec<Vec<RowId>> = diagram.vertices.values()
        .map(|entity| x.entity(entity).map(EntityData::row_ids))
        .collect::<MigrateResult<_>>()?;
    let offsets: Vec<usize> = arms.iter()
        .scan(0, |acc, rows| {
            let start = *acc;
            *acc += rows.len();
            Some(start)
        })
        .collect();
    let total: usize = arms.iter().map(Vec::len).sum();

    let mut uf = UnionFind::with_len(total);
    for edge in &diagram.edges {
        let (s, t) = (diagram.index_of(&edge.source)?, diagram.index_of(&edge.target)?);
        for (i, &row) in arms[s].iter().enumerate() {
            let image = x.follow_path(schema, &edge.path, row)?;
            let j = arms[t].binary_search(&image).map_err(|_| MigrateError::MissingValue {
                entity: diagram.entity_of(&edge.target).unwrap_or_default().to_string(),
                row: image,
                edge: edge.path.to_string(),
            })?;
            uf.union(offsets[s] + i, offsets[t] + j);
        }
    }

    let mut class_of_root: HashMap<usize, usize> = HashMap::new();
    let mut classes: Vec<Vec<(usize, RowId)>> = Vec::new();
    for (arm, rows) in arms.iter().enumerate() {
        for (i, &row) in rows.iter().enumerate() {
            let root = uf.find(offsets[arm] + i);
            let class = *class_of_root.entry(root).or_insert_with(|| {
                classes.push(Vec::new());
                classes.len() - 1
            });
            classes[class].push((arm, row));
        }
    }
    if !diagram.edges.is_empty() {
        debug!(members = total, classes = classes.len(), "case: identified");
    }
    Ok(classes)
}

// =============================================================================
// PHASE 2 — images des FK et attributs
// =============================================================================

struct Evaluator<'e> {
    query: &'e Query,
    source: &'e Schema,
    target: &'e Schema,
    instance: &'e Instance,
    objects: &'e HashMap<&'e str, ObjectRows<'e>>,
}

impl<'e> Evaluator<'e> {
    fn object(&self, entity: &str) -> MigrateResult<&ObjectRows<'e>> {
        self.objects.get(entity).ok_or_else(|| {
            MigrateError::SchemaMismatch(format!("entity '{}' was not evaluated", entity))
        })
    }

    fn entity_data(&self, entity: &str) -> MigrateResult<EntityData> {
        let rows = self.object(entity)?;
        let edges = self.source.edges_from(entity);
        let mut data = EntityData::new();

        for (id, ctx) in rows.rows() {
            let mut attrs = Vec::new();
            let mut fks = Vec::new();
            for edge in &edges {
                match edge {
                    Edge::ForeignKey { name, target, .. } => {
                        let image = self.query.morphisms.get(name).ok_or_else(|| missing_image(name))?;
                        fks.push((name.clone(), self.morphism(name, image, ctx, self.object(target)?)?));
                    }
                    Edge::Attribute { name, .. } => {
                        let image = self.query.attributes.get(name).ok_or_else(|| missing_image(name))?;
                        attrs.push((name.clone(), self.attribute(name, image, ctx)?));
                    }
                }
            }
            data.insert_with_id(id, attrs, fks);
            if let Some(label) = rows.label(ctx) {
                data.set_label(id, label);
            }
        }
        Ok(data)
    }

    /// La ligne de T désignée par un sélecteur.
    fn select(&self, selector: &Selector, ctx: RowContext<'_>) -> MigrateResult<RowId> {
        match (selector, ctx) {
            (Selector::Path(path), RowContext::Row(row)) => self.instance.follow_path(self.target, path, row),
            (Selector::Vertex { vertex, path }, RowContext::Tuple(diagram, tuple)) => {
                let row = tuple[diagram.index_of(vertex)?];
                self.instance.follow_path(self.target, path, row)
            }
            (selector, _) => Err(MigrateError::MalformedMapping(format!(
                "selector {} does not apply to this row",
                selector
            ))),
        }
    }

    fn morphism(
        &self,
        name: &str,
        image: &MorphismImage,
        ctx: RowContext<'_>,
        codomain: &ObjectRows<'_>,
    ) -> MigrateResult<RowId> {
        match (image, codomain) {
            (MorphismImage::Dispatch(arms), _) => {
                let RowContext::Case(diagram, members) = ctx else {
                    return Err(MigrateError::MalformedMapping(format!(
                        "'{}': only a case row can be dispatched", name
                    )));
                };
                self.agree(name, diagram, members, |arm, row| {
                    self.morphism(name, arm, RowContext::Row(row), codomain)
                }, arms)
            }
            (MorphismImage::Select(selector), ObjectRows::Plain(_)) => self.select(selector, ctx),
            (MorphismImage::Tuple(components), ObjectRows::Join { diagram, index, .. }) => {
                let tuple = diagram.vertices.keys()
                    .map(|vertex| {
                        let selector = components.get(vertex).ok_or_else(|| missing_image(vertex))?;
                        self.select(selector, ctx)
                    })
                    .collect::<MigrateResult<Vec<RowId>>>()?;
                index.get(&tuple).copied().ok_or_else(|| {
                    MigrateError::NonFunctorial(format!(
                        "'{}' sends a row to {:?}, which does not satisfy {}",
                        name, tuple, diagram
                    ))
                })
            }
            (MorphismImage::Inject { case, selector }, ObjectRows::Case { diagram, index, .. }) => {
                let arm = diagram.index_of(case)?;
                let row = self.select(selector, ctx)?;
                index.get(&(arm, row)).copied().ok_or_else(|| MigrateError::MissingValue {
                    entity: diagram.entity_of(case).unwrap_or_default().to_string(),
                    row,
                    edge: name.to_string(),
                })
            }
            _ => Err(MigrateError::MalformedMapping(format!(
                "'{}': image does not match its codomain", name
            ))),
        }
    }

    fn attribute(&self, name: &str, image: &AttributeImage, ctx: RowContext<'_>) -> MigrateResult<Value> {
        match image {
            AttributeImage::Read { selector, attribute } => {
                let row = self.select(selector, ctx)?;
                let (entity, _) = self.target.attribute(attribute)?;
                self.instance.attr_value(entity, row, attribute).cloned()
            }
            AttributeImage::Dispatch(arms) => {
                let RowContext::Case(diagram, members) = ctx else {
                    return Err(MigrateError::MalformedMapping(format!(
                        "'{}': only a case row can be dispatched", name
                    )));
                };
                self.agree(name, diagram, members, |arm, row| {
                    self.attribute(name, arm, RowContext::Row(row))
                }, arms)
            }
        }
    }

    /// Évalue le bras de chaque membre d'une classe ; tous doivent
    /// donner la même réponse.
    fn agree<I, T: PartialEq + std::fmt::Debug>(
        &self,
        name: &str,
        diagram: &Diagram,
        members: &[(usize, RowId)],
        eval: impl Fn(&I, RowId) -> MigrateResult<T>,
        arms: &indexmap::IndexMap<String, I>,
    ) -> MigrateResult<T> {
        let mut answer: Option<T> = None;
        for &(arm, row) in members {
            let (case, _) = diagram.vertices.get_index(arm).ok_or_else(|| unbound(diagram, arm))?;
            let image = arms.get(case).ok_or_else(|| missing_image(case))?;
            let value = eval(image, row)?;
            if let Some(previous) = &answer {
                if *previous != value {
                    return Err(MigrateError::NonFunctorial(format!(
                        "'{}' gives {:?} and {:?} on identified rows",
                        name, previous, value
                    )));
                }
                continue;
            }
            answer = Some(value);
        }
        answer.ok_or_else(|| MigrateError::MalformedMapping(format!("'{}': empty case class", name)))
    }
}

fn missing_image(name: &str) -> MigrateError {
    MigrateError::MalformedMapping(format!("no image for '{}'", name))
}
