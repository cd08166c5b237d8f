// =============================================================================
// CATMIG — Point d'entrée : démonstration des moteurs de migration
// =============================================================================
//
// Trois démonstrations, sur des données en mémoire :
//   paths2    : jointure (limite) des chemins de longueur 2 d'un cycle
//   symmetric : union (colimite) d'un graphe et de son opposé
//   company   : Δ le long d'un renommage, puis Σ vers un schéma plus petit
//
//   RUST_LOG=catmig=debug cargo run -- --demo paths2 --tabular
//
// =============================================================================

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use indexmap::IndexMap;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use catmig::core::diagram::Diagram;
use catmig::core::instance::Instance;
use catmig::core::mapping::Mapping;
use catmig::core::query::{MorphismImage, ObjectImage, Query, Selector};
use catmig::core::schema::{Path, Schema};
use catmig::core::tabular::{render, tabular};
use catmig::core::typeside::{BaseType, Value};
use catmig::{DeltaMigration, EvalConfig, MigrateResult, Migrator, QueryMigration, SigmaMigration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Demo {
    Paths2,
    Symmetric,
    Company,
    All,
}

/// Démonstration des migrations catégoriques (Δ, requêtes, Σ)
#[derive(Debug, Parser)]
#[command(name = "catmig", version)]
struct Args {
    /// Fichier JSON de configuration (EvalConfig)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Affiche aussi la vue tabulaire des résultats de requête
    #[arg(long)]
    tabular: bool,

    #[arg(long, value_enum, default_value_t = Demo::All)]
    demo: Demo,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match load_config(args.config.as_ref()) {
        Ok(config) => config,
        Err(message) => {
            error!("{}", message);
            return ExitCode::FAILURE;
        }
    };
    info!(?config, "configuration");

    let run = |demo: Demo| -> MigrateResult<()> {
        match demo {
            Demo::Paths2 => paths2(&config, args.tabular),
            Demo::Symmetric => symmetric(&config, args.tabular),
            Demo::Company => company(&config),
            Demo::All => {
                paths2(&config, args.tabular)?;
                symmetric(&config, args.tabular)?;
                company(&config)
            }
        }
    };

    match run(args.demo) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "migration failed");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EvalConfig, String> {
    let Some(path) = path else {
        return Ok(EvalConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    EvalConfig::from_json_str(&text).map_err(|e| format!("invalid config {}: {}", path.display(), e))
}

fn banner(title: &str) {
    println!("\n═══ {} ═══\n", title);
}

// =============================================================================
// Graphes
// =============================================================================

fn graph(name: &str) -> Schema {
    let mut s = Schema::new(name);
    s.add_node("E")
     .add_node("V")
     .add_fk("src", "E", "V")
     .add_fk("tgt", "E", "V");
    s
}

/// Le cycle à `n` sommets : i → i+1
fn cycle(schema: &Schema, n: u64) -> MigrateResult<Instance> {
    let mut x = Instance::new("Cycle", schema);
    for _ in 0..n {
        x.insert("V", [], [])?;
    }
    for i in 1..=n {
        x.insert("E", [], [("src".to_string(), i), ("tgt".to_string(), i % n + 1)])?;
    }
    Ok(x)
}

fn paths2(config: &EvalConfig, show_tabular: bool) -> MigrateResult<()> {
    banner("Chemins de longueur 2 (jointure)");
    let (s, t) = (graph("Graph2"), graph("Graph"));

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
    println!("{}", q);

    let x = cycle(&t, 5)?;
    let y = QueryMigration::new(&q, &s, &t)?.with_config(config.clone()).migrate(&x)?;
    println!("{}", y.display(&s));
    if show_tabular {
        println!("{}", render(&tabular(&y, "E")?));
    }
    Ok(())
}

fn symmetric(config: &EvalConfig, show_tabular: bool) -> MigrateResult<()> {
    banner("Graphe symétrique (union)");
    let (s, t) = (graph("Graph2"), graph("Graph"));

    let swap = |first: &str, second: &str| {
        MorphismImage::Dispatch(IndexMap::from([
            ("fwd".to_string(), MorphismImage::Select(Selector::path("E", vec![first]))),
            ("rev".to_string(), MorphismImage::Select(Selector::path("E", vec![second]))),
        ]))
    };
    let mut q = Query::new("Symmetric", "Graph2", "Graph");
    q.map_object("V", ObjectImage::Plain("V".into()))
     .map_object("E", ObjectImage::Case(Diagram::new().vertex("fwd", "E").vertex("rev", "E")))
     .map_morphism("src", swap("src", "tgt"))
     .map_morphism("tgt", swap("tgt", "src"));
    println!("{}", q);

    let x = cycle(&t, 3)?;
    let y = QueryMigration::new(&q, &s, &t)?.with_config(config.clone()).migrate(&x)?;
    println!("{}", y.display(&s));
    if show_tabular {
        println!("{}", render(&tabular(&y, "E")?));
    }
    Ok(())
}

// =============================================================================
// Entreprise : Δ puis Σ
// =============================================================================

fn company(config: &EvalConfig) -> MigrateResult<()> {
    banner("Δ : renommage d'un schéma d'entreprise");

    let mut old = Schema::new("OldCompany");
    old.add_node("Person")
       .add_node("Dept")
       .add_fk("works_in", "Person", "Dept")
       .add_attribute("person_name", "Person", BaseType::String)
       .add_attribute("dept_name", "Person", BaseType::String);

    let mut new = Schema::new("NewCompany");
    new.add_node("Employee")
       .add_node("Department")
       .add_fk("department", "Employee", "Department")
       .add_attribute("full_name", "Employee", BaseType::String)
       .add_attribute("dept_label", "Department", BaseType::String);

    let mut rename = Mapping::new("Rename", "OldCompany", "NewCompany");
    rename.map_node("Person", "Employee")
          .map_node("Dept", "Department")
          .map_fk("works_in", Path::new("Employee", vec!["department"]))
          .map_attr_direct("person_name", "full_name")
          .map_attr("dept_name", vec!["department"], "dept_label");
    println!("{}", rename);

    let mut data = Instance::new("NewData", &new);
    let engineering = data.insert("Department",
        [("dept_label".to_string(), Value::String("Engineering".into()))], [])?;
    let marketing = data.insert("Department",
        [("dept_label".to_string(), Value::String("Marketing".into()))], [])?;
    for (name, dept) in [("Alice", engineering), ("Bob", engineering), ("Charlie", marketing)] {
        data.insert("Employee",
            [("full_name".to_string(), Value::String(name.into()))],
            [("department".to_string(), dept)])?;
    }

    let pulled = DeltaMigration::new(&rename, &old, &new)?.with_config(config.clone()).migrate(&data)?;
    println!("{}", pulled.display(&old));

    banner("Σ : tout le monde dans un seul annuaire");

    let mut directory = Schema::new("Directory");
    directory.add_node("Entry")
             .add_attribute("label", "Entry", BaseType::String);

    let mut flatten = Mapping::new("Flatten", "NewCompany", "Directory");
    flatten.map_node("Employee", "Entry")
           .map_node("Department", "Entry")
           .map_fk("department", Path::identity("Entry"))
           .map_attr_direct("full_name", "label")
           .map_attr_direct("dept_label", "label");
    println!("{}", flatten);

    // department ↦ id identifie chaque employé à son département : les
    // libellés entrent en conflit, Σ refuse.
    match SigmaMigration::new(&flatten, &new, &directory)?.with_config(config.clone()).migrate(&data) {
        Ok(pushed) => println!("{}", pushed.display(&directory)),
        Err(e) => println!("✗ {}\n", e),
    }

    let mut departments = Schema::new("Departments");
    departments.add_node("Team")
               .add_attribute("team_label", "Team", BaseType::String);
    let mut collapse = Mapping::new("Collapse", "NewCompany", "Departments");
    collapse.map_node("Employee", "Team")
            .map_node("Department", "Team")
            .map_fk("department", Path::identity("Team"))
            .map_attr_direct("full_name", "team_label")
            .map_attr_direct("dept_label", "team_label");

    let mut teams = Instance::new("Teams", &new);
    let solo = teams.insert("Department",
        [("dept_label".to_string(), Value::String("Solo".into()))], [])?;
    teams.insert("Employee",
        [("full_name".to_string(), Value::String("Solo".into()))],
        [("department".to_string(), solo)])?;

    let pushed = SigmaMigration::new(&collapse, &new, &departments)?.with_config(config.clone()).migrate(&teams)?;
    println!("{}", pushed.display(&departments));
    Ok(())
}
