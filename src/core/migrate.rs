// =============================================================================
// MIGRATE — Les transformateurs de migration : Δ, requêtes, Σ
// =============================================================================
//
// Chaque migration est un TRANSFORMATEUR réutilisable, construit une seule
// fois à partir d'un mapping (ou d'une requête) validé :
//
// ┌─────────────────────────────────────────────────────────────────────┐
// │                                                                     │
// │  DeltaMigration  (F : S → T)   Instance(T) → Instance(S)            │
// │  Précomposition : une vue, mêmes RowId.                             │
// │                                                                     │
// │  QueryMigration  (Q : S → T)   Instance(T) → Instance(S)            │
// │  Jointures (limites) et unions (colimites) de lignes de T.          │
// │                                                                     │
// │  SigmaMigration  (F : C → D)   Instance(C) → Instance(D)            │
// │  Poussée + quotient : extension de Kan à gauche.                    │
// │                                                                     │
// └─────────────────────────────────────────────────────────────────────┘
//
// Toute la vérification statique (schémas, mapping, requête) a lieu dans
// `new`. `migrate` ne rend qu'une instance complète ; `migrate_into`
// calcule d'abord le résultat, puis l'ajoute en coproduit, si bien qu'un
// échec ne laisse jamais d'instance partiellement modifiée.
//
// =============================================================================

use tracing::info;

use super::config::EvalConfig;
use super::delta;
use super::error::{MigrateError, MigrateResult};
use super::instance::Instance;
use super::limit;
use super::mapping::Mapping;
use super::query::Query;
use super::schema::Schema;
use super::sigma;
use super::validate::{check_equations, validate_instance, validate_schema, ValidationError};

/// Un transformateur Instance → Instance.
pub trait Migrator {
    /// Le schéma des instances acceptées.
    fn input_schema(&self) -> &Schema;

    /// Le schéma des instances produites.
    fn output_schema(&self) -> &Schema;

    fn config(&self) -> &EvalConfig;

    /// Le calcul proprement dit, sur une entrée déjà vérifiée.
    fn run(&self, instance: &Instance) -> MigrateResult<Instance>;

    /// Migre `instance` vers une instance fraîche de `output_schema`.
    fn migrate(&self, instance: &Instance) -> MigrateResult<Instance> {
        check_input(self.input_schema(), instance, self.config())?;
        let result = self.run(instance)?;
        check_output_equations(&result, self.output_schema())?;
        if self.config().validate_result {
            validate_instance(&result, self.output_schema()).map_err(MigrateError::InvalidInstance)?;
        }
        Ok(result)
    }

    /// Ajoute le résultat de la migration à `existing`, comme lignes
    /// supplémentaires (coproduit, sans déduplication).
    fn migrate_into(&self, existing: &mut Instance, instance: &Instance) -> MigrateResult<()> {
        let fresh = self.migrate(instance)?;
        existing.coproduct_in_place(&fresh, self.output_schema())
    }
}

fn check_input(schema: &Schema, instance: &Instance, config: &EvalConfig) -> MigrateResult<()> {
    if instance.schema_name != schema.name {
        return Err(MigrateError::SchemaMismatch(format!(
            "instance '{}' is over '{}', expected '{}'",
            instance.name, instance.schema_name, schema.name
        )));
    }
    if config.validate_source {
        validate_instance(instance, schema).map_err(MigrateError::InvalidInstance)?;
    }
    Ok(())
}

/// Un résultat qui viole une équation du schéma produit n'est jamais rendu.
fn check_output_equations(result: &Instance, schema: &Schema) -> MigrateResult<()> {
    if schema.path_equations.is_empty() {
        return Ok(());
    }
    check_equations(result, schema).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(ValidationError::to_string).collect();
        MigrateError::NonFunctorial(format!(
            "instance '{}' violates the equations of '{}': {}",
            result.name, schema.name, messages.join("; ")
        ))
    })
}

fn check_schemas(schemas: [&Schema; 2]) -> MigrateResult<()> {
    for schema in schemas {
        validate_schema(schema).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(ValidationError::to_string).collect();
            MigrateError::SchemaMismatch(format!("schema '{}' is malformed: {}", schema.name, messages.join("; ")))
        })?;
    }
    Ok(())
}

// =============================================================================
// DELTA
// =============================================================================

/// Δ_F pour F : S → T.
#[derive(Debug, Clone)]
pub struct DeltaMigration<'a> {
    mapping: &'a Mapping,
    source: &'a Schema,
    target: &'a Schema,
    config: EvalConfig,
}

impl<'a> DeltaMigration<'a> {
    pub fn new(mapping: &'a Mapping, source: &'a Schema, target: &'a Schema) -> MigrateResult<Self> {
        check_schemas([source, target])?;
        mapping.validate(source, target)?;
        Ok(DeltaMigration { mapping, source, target, config: EvalConfig::default() })
    }

    pub fn with_config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }
}

impl Migrator for DeltaMigration<'_> {
    fn input_schema(&self) -> &Schema {
        self.target
    }

    fn output_schema(&self) -> &Schema {
        self.source
    }

    fn config(&self) -> &EvalConfig {
        &self.config
    }

    fn run(&self, instance: &Instance) -> MigrateResult<Instance> {
        info!(mapping = %self.mapping.name, rows = instance.total_rows(), "delta migration");
        delta::delta(self.mapping, self.source, self.target, instance)
    }
}

// =============================================================================
// QUERY (limites / colimites)
// =============================================================================

/// Évaluation d'une requête Q : S → T.
#[derive(Debug, Clone)]
pub struct QueryMigration<'a> {
    query: &'a Query,
    source: &'a Schema,
    target: &'a Schema,
    config: EvalConfig,
}

impl<'a> QueryMigration<'a> {
    pub fn new(query: &'a Query, source: &'a Schema, target: &'a Schema) -> MigrateResult<Self> {
        check_schemas([source, target])?;
        query.validate(source, target)?;
        Ok(QueryMigration { query, source, target, config: EvalConfig::default() })
    }

    pub fn with_config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }
}

impl Migrator for QueryMigration<'_> {
    fn input_schema(&self) -> &Schema {
        self.target
    }

    fn output_schema(&self) -> &Schema {
        self.source
    }

    fn config(&self) -> &EvalConfig {
        &self.config
    }

    fn run(&self, instance: &Instance) -> MigrateResult<Instance> {
        info!(
            query = %self.query.name,
            rows = instance.total_rows(),
            parallel = self.config.parallel,
            "query migration"
        );
        limit::eval_query(self.query, self.source, self.target, instance, &self.config)
    }
}

// =============================================================================
// SIGMA
// =============================================================================

/// Σ_F pour F : C → D.
#[derive(Debug, Clone)]
pub struct SigmaMigration<'a> {
    mapping: &'a Mapping,
    source: &'a Schema,
    target: &'a Schema,
    config: EvalConfig,
}

impl<'a> SigmaMigration<'a> {
    pub fn new(mapping: &'a Mapping, source: &'a Schema, target: &'a Schema) -> MigrateResult<Self> {
        check_schemas([source, target])?;
        mapping.validate(source, target)?;
        Ok(SigmaMigration { mapping, source, target, config: EvalConfig::default() })
    }

    pub fn with_config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }
}

impl Migrator for SigmaMigration<'_> {
    fn input_schema(&self) -> &Schema {
        self.source
    }

    fn output_schema(&self) -> &Schema {
        self.target
    }

    fn config(&self) -> &EvalConfig {
        &self.config
    }

    fn run(&self, instance: &Instance) -> MigrateResult<Instance> {
        info!(mapping = %self.mapping.name, rows = instance.total_rows(), "sigma migration");
        sigma::sigma(self.mapping, self.source, self.target, instance)
    }
}

// =============================================================================
// Surface d'appel directe
// =============================================================================

/// Construit une instance de `output` à partir de `instance` (sur `input`)
/// et d'une requête Q : output → input.
pub fn migrate(output: &Schema, input: &Schema, instance: &Instance, query: &Query) -> MigrateResult<Instance> {
    QueryMigration::new(query, output, input)?.migrate(instance)
}

/// Comme `migrate`, mais ajoute les lignes produites à `existing`, une
/// instance de `output`.
pub fn migrate_into(
    existing: &mut Instance,
    output: &Schema,
    input: &Schema,
    instance: &Instance,
    query: &Query,
) -> MigrateResult<()> {
    QueryMigration::new(query, output, input)?.migrate_into(existing, instance)
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diagram::Diagram;
    use crate::core::query::{MorphismImage, ObjectImage, Selector};
    use crate::core::schema::Path;
    use crate::core::tabular::tabular;
    use crate::core::typeside::{BaseType, Value};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn text(s: &str) -> Value {
        Value::String(s.into())
    }

    /// C : l'entreprise
    fn company_schema() -> Schema {
        let mut s = Schema::new("Company");
        s.add_node("Employee")
         .add_node("Department")
         .add_fk("works_in", "Employee", "Department")
         .add_fk("manager", "Department", "Employee")
         .add_attribute("emp_name", "Employee", BaseType::String)
         .add_attribute("dept_name", "Department", BaseType::String);
        s
    }

    fn company_instance(schema: &Schema) -> Instance {
        let mut inst = Instance::new("CompanyData", schema);
        let rnd = inst.insert("Department", [("dept_name".to_string(), text("R&D"))], []).unwrap();
        let ops = inst.insert("Department", [("dept_name".to_string(), text("Ops"))], []).unwrap();
        let alice = inst.insert("Employee",
            [("emp_name".to_string(), text("Alice"))],
            [("works_in".to_string(), rnd)],
        ).unwrap();
        inst.insert("Employee",
            [("emp_name".to_string(), text("Bob"))],
            [("works_in".to_string(), rnd)],
        ).unwrap();
        let carol = inst.insert("Employee",
            [("emp_name".to_string(), text("Carol"))],
            [("works_in".to_string(), ops)],
        ).unwrap();
        let departments = inst.entity_mut("Department").unwrap();
        departments.set_fk(rnd, "manager", alice);
        departments.set_fk(ops, "manager", carol);
        inst
    }

    /// B : équipes et personnes
    fn staff_schema() -> Schema {
        let mut s = Schema::new("Staff");
        s.add_node("Person")
         .add_node("Team")
         .add_fk("member_of", "Person", "Team")
         .add_fk("lead", "Team", "Person")
         .add_attribute("name", "Person", BaseType::String)
         .add_attribute("title", "Team", BaseType::String);
        s
    }

    /// A : chacun et son chef
    fn boss_schema() -> Schema {
        let mut s = Schema::new("Boss");
        s.add_node("Worker")
         .add_fk("boss", "Worker", "Worker")
         .add_attribute("worker_name", "Worker", BaseType::String)
         .add_attribute("team_title", "Worker", BaseType::String);
        s
    }

    /// G : Staff → Company
    fn staff_to_company() -> Mapping {
        let mut g = Mapping::new("G", "Staff", "Company");
        g.map_node("Person", "Employee")
         .map_node("Team", "Department")
         .map_fk("member_of", Path::new("Employee", vec!["works_in"]))
         .map_fk("lead", Path::new("Department", vec!["manager"]))
         .map_attr_direct("name", "emp_name")
         .map_attr_direct("title", "dept_name");
        g
    }

    /// F : Boss → Staff
    fn boss_to_staff() -> Mapping {
        let mut f = Mapping::new("F", "Boss", "Staff");
        f.map_node("Worker", "Person")
         .map_fk("boss", Path::new("Person", vec!["member_of", "lead"]))
         .map_attr_direct("worker_name", "name")
         .map_attr("team_title", vec!["member_of"], "title");
        f
    }

    #[test]
    fn test_delta_identity() {
        let c = company_schema();
        let x = company_instance(&c);
        let id = Mapping::identity(&c);
        let y = DeltaMigration::new(&id, &c, &c).unwrap().migrate(&x).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn test_delta_composition() {
        let (a, b, c) = (boss_schema(), staff_schema(), company_schema());
        let (f, g) = (boss_to_staff(), staff_to_company());
        let x = company_instance(&c);

        let step = DeltaMigration::new(&g, &b, &c).unwrap().migrate(&x).unwrap();
        let twice = DeltaMigration::new(&f, &a, &b).unwrap().migrate(&step).unwrap();

        let gf = f.compose(&g, &a).unwrap();
        let once = DeltaMigration::new(&gf, &a, &c).unwrap().migrate(&x).unwrap();

        assert_eq!(twice, once);
        // Bob (2) travaille en R&D, dirigée par Alice (1)
        assert_eq!(once.fk_value("Worker", 2, "boss").unwrap(), 1);
        assert_eq!(once.attr_value("Worker", 3, "team_title").unwrap(), &text("Ops"));
    }

    #[test]
    fn test_merge_in_place_is_coproduct() {
        let (b, c) = (staff_schema(), company_schema());
        let g = staff_to_company();
        let x = company_instance(&c);
        let delta = DeltaMigration::new(&g, &b, &c).unwrap();

        let y0 = delta.migrate(&x).unwrap();
        let mut expected = y0.clone();
        expected.coproduct_in_place(&delta.migrate(&x).unwrap(), &b).unwrap();

        let mut merged = y0.clone();
        delta.migrate_into(&mut merged, &x).unwrap();

        assert_eq!(merged, expected);
        assert_eq!(merged.row_count("Person"), 2 * y0.row_count("Person"));
        assert_eq!(merged.row_count("Team"), 2 * y0.row_count("Team"));
        // Les lignes ajoutées ne touchent pas les lignes existantes
        assert_eq!(merged.fk_value("Person", 4, "member_of").unwrap(), 3);
        assert_eq!(merged.fk_value("Person", 1, "member_of").unwrap(), 1);
    }

    fn graph(name: &str) -> Schema {
        let mut s = Schema::new(name);
        s.add_node("E")
         .add_node("V")
         .add_fk("src", "E", "V")
         .add_fk("tgt", "E", "V");
        s
    }

    fn cycle(schema: &Schema, n: u64) -> Instance {
        let mut x = Instance::new("Cycle", schema);
        for _ in 0..n {
            x.insert("V", [], []).unwrap();
        }
        for i in 1..=n {
            x.insert("E", [], [("src".to_string(), i), ("tgt".to_string(), i % n + 1)]).unwrap();
        }
        x
    }

    fn paths_of_length_two() -> Query {
        let mut q = Query::new("Paths2", "Graph2", "Graph");
        q.map_object("V", ObjectImage::Plain("V".into()))
         .map_object("E", ObjectImage::Join(Diagram::new()
             .vertex("e1", "E")
             .vertex("e2", "E")
             .vertex("v", "V")
             .edge("e1", "v", Path::new("E", vec!["tgt"]))
             .edge("e2", "v", Path::new("E", vec!["src"]))))
         .map_morphism("src", MorphismImage::Select(Selector::at("e1", Path::new("E", vec!["src"]))))
         .map_morphism("tgt", MorphismImage::Select(Selector::at("e2", Path::new("E", vec!["tgt"]))));
        q
    }

    #[test]
    fn test_join_on_five_cycle() {
        let (s, t) = (graph("Graph2"), graph("Graph"));
        let y = migrate(&s, &t, &cycle(&t, 5), &paths_of_length_two()).unwrap();

        assert_eq!(y.row_count("E"), 5);
        let hops: BTreeSet<(u64, u64)> = y.entity("E").unwrap().row_ids().into_iter()
            .map(|e| (y.fk_value("E", e, "src").unwrap(), y.fk_value("E", e, "tgt").unwrap()))
            .collect();
        let expected: BTreeSet<(u64, u64)> = (1..=5).map(|i| (i, (i + 1) % 5 + 1)).collect();
        assert_eq!(hops, expected);

        // Chaque ligne expose ses composantes
        let rows = tabular(&y, "E").unwrap();
        assert_eq!(rows[0].columns.keys().collect::<Vec<_>>(), vec!["e1", "e2", "v"]);
        assert_eq!(rows[0].columns["v"], ("V".to_string(), 2));
    }

    #[test]
    fn test_case_disjointness() {
        let t = graph("Graph");
        let mut s = Schema::new("Things");
        s.add_node("Thing");
        let mut q = Query::new("Everything", "Things", "Graph");
        q.map_object("Thing", ObjectImage::Case(Diagram::new().vertex("edge", "E").vertex("vertex", "V")));

        let x = cycle(&t, 4);
        let y = migrate(&s, &t, &x, &q).unwrap();
        assert_eq!(y.row_count("Thing"), x.row_count("E") + x.row_count("V"));

        let rows = tabular(&y, "Thing").unwrap();
        let tags: Vec<&str> = rows.iter().filter_map(|r| r.case.as_deref()).collect();
        assert_eq!(tags, vec!["edge", "edge", "edge", "edge", "vertex", "vertex", "vertex", "vertex"]);
    }

    #[test]
    fn test_query_merge_into() {
        let (s, t) = (graph("Graph2"), graph("Graph"));
        let q = paths_of_length_two();
        let x = cycle(&t, 3);
        let mut y = migrate(&s, &t, &x, &q).unwrap();
        migrate_into(&mut y, &s, &t, &x, &q).unwrap();
        assert_eq!(y.row_count("E"), 6);
        assert_eq!(y.row_count("V"), 6);
    }

    #[test]
    fn test_sigma_identity() {
        let c = company_schema();
        let x = company_instance(&c);
        let id = Mapping::identity(&c);
        let y = SigmaMigration::new(&id, &c, &c).unwrap().migrate(&x).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn test_sigma_bipartite_cardinality() {
        let mut c = Schema::new("Bipartite");
        c.add_node("Left")
         .add_node("Right")
         .add_attribute("left_label", "Left", BaseType::Integer)
         .add_attribute("right_label", "Right", BaseType::Integer);
        let mut d = Schema::new("Vertices");
        d.add_node("Vertex").add_attribute("label", "Vertex", BaseType::Integer);
        let mut f = Mapping::new("Flatten", "Bipartite", "Vertices");
        f.map_node("Left", "Vertex")
         .map_node("Right", "Vertex")
         .map_attr_direct("left_label", "label")
         .map_attr_direct("right_label", "label");

        let mut x = Instance::new("X", &c);
        for i in 0..4 {
            x.insert("Left", [("left_label".to_string(), Value::Integer(i))], []).unwrap();
        }
        for i in 0..3 {
            x.insert("Right", [("right_label".to_string(), Value::Integer(i))], []).unwrap();
        }

        let y = SigmaMigration::new(&f, &c, &d).unwrap().migrate(&x).unwrap();
        assert_eq!(y.row_count("Vertex"), 7);
    }

    #[test]
    fn test_construction_errors_come_first() {
        let (s, t) = (graph("Graph2"), graph("Graph"));
        let mut q = paths_of_length_two();
        q.map_morphism("src", MorphismImage::Select(Selector::at("e3", Path::new("E", vec!["src"]))));
        assert!(matches!(QueryMigration::new(&q, &s, &t), Err(MigrateError::MalformedMapping(_))));

        let mut g = staff_to_company();
        g.map_fk("lead", Path::new("Department", vec!["works_in"]));
        assert!(matches!(
            DeltaMigration::new(&g, &staff_schema(), &company_schema()),
            Err(MigrateError::SchemaMismatch(_) | MigrateError::AritySizeMismatch(_))
        ));
    }

    #[test]
    fn test_source_is_checked() {
        let (b, c) = (staff_schema(), company_schema());
        let g = staff_to_company();
        let delta = DeltaMigration::new(&g, &b, &c).unwrap();

        // Une instance d'un autre schéma
        assert!(matches!(delta.migrate(&cycle(&graph("Graph"), 2)), Err(MigrateError::SchemaMismatch(_))));

        // Une instance non totale
        let mut partial = company_instance(&c);
        partial.insert("Employee", [("emp_name".to_string(), text("Dan"))], []).unwrap();
        assert!(matches!(delta.migrate(&partial), Err(MigrateError::InvalidInstance(_))));

        // Sans validation, l'erreur vient de l'évaluation
        let lax = delta.clone().with_config(EvalConfig { validate_source: false, ..EvalConfig::default() });
        assert!(matches!(lax.migrate(&partial), Err(MigrateError::MissingValue { .. })));

        // Et l'instance cible d'un merge reste intacte
        let mut y0 = delta.migrate(&company_instance(&c)).unwrap();
        let before = y0.clone();
        assert!(delta.migrate_into(&mut y0, &partial).is_err());
        assert_eq!(y0, before);
    }

    /// C : f = g : A → B, et D : p, q : V → W sans équation
    fn parallel_schemas() -> (Schema, Schema) {
        let mut c = Schema::new("Parallel");
        c.add_node("A")
         .add_node("B")
         .add_fk("f", "A", "B")
         .add_fk("g", "A", "B")
         .add_path_equation(Path::new("A", vec!["f"]), Path::new("A", vec!["g"]));
        let mut d = Schema::new("Pair");
        d.add_node("V")
         .add_node("W")
         .add_fk("p", "V", "W")
         .add_fk("q", "V", "W");
        (c, d)
    }

    fn pair_instance(d: &Schema, p: u64, q: u64) -> Instance {
        let mut x = Instance::new("X", d);
        x.insert("W", [], []).unwrap();
        x.insert("W", [], []).unwrap();
        x.insert("V", [], [("p".to_string(), p), ("q".to_string(), q)]).unwrap();
        x
    }

    #[test]
    fn test_delta_rejects_broken_equation() {
        let (c, d) = parallel_schemas();
        let mut split = Mapping::new("Split", "Parallel", "Pair");
        split.map_node("A", "V")
             .map_node("B", "W")
             .map_fk("f", Path::new("V", vec!["p"]))
             .map_fk("g", Path::new("V", vec!["q"]));
        assert!(matches!(DeltaMigration::new(&split, &c, &d), Err(MigrateError::NonFunctorial(_))));
        assert!(matches!(SigmaMigration::new(&split, &c, &d), Err(MigrateError::NonFunctorial(_))));
    }

    #[test]
    fn test_result_must_satisfy_output_equations() {
        let (c, d) = parallel_schemas();
        let mut q = Query::new("Split", "Parallel", "Pair");
        q.map_object("A", ObjectImage::Plain("V".into()))
         .map_object("B", ObjectImage::Plain("W".into()))
         .map_morphism("f", MorphismImage::Select(Selector::path("V", vec!["p"])))
         .map_morphism("g", MorphismImage::Select(Selector::path("V", vec!["q"])));

        // p et q diffèrent sur la ligne de V : f = g ne tient pas
        assert!(matches!(
            migrate(&c, &d, &pair_instance(&d, 1, 2), &q),
            Err(MigrateError::NonFunctorial(_))
        ));

        // Elles coïncident : le résultat est rendu
        let y = migrate(&c, &d, &pair_instance(&d, 2, 2), &q).unwrap();
        assert_eq!(y.fk_value("A", 1, "f").unwrap(), 2);
        assert_eq!(y.fk_value("A", 1, "g").unwrap(), 2);
    }
}
