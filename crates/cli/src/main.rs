//! Developer harness for the chartform engine.
//!
//! `chartform render` loads a form definition and a record fixture, renders
//! the form, and prints the HTML fragment. `chartform submit` additionally
//! reads a submission (field → values, JSON) and prints either the
//! validation errors or the resulting draft.

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use chartform_engine::{
    CompiledForm, EngineConfig, FormEntrySession, Mode, Submission, SubmitOutcome, TagRegistry,
};
use chartform_record::store::{InMemoryStore, RecordStore};
use chartform_record::time::SystemClock;

#[derive(Parser)]
#[command(name = "chartform")]
#[command(about = "Clinical form engine developer harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Enter,
    Edit,
    View,
}

impl From<ModeArg> for Mode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Enter => Mode::Enter,
            ModeArg::Edit => Mode::Edit,
            ModeArg::View => Mode::View,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Render a form definition against a record fixture
    Render {
        /// Form definition (YAML node tree)
        form: PathBuf,
        /// Record fixture (YAML: references + visit)
        fixture: PathBuf,
        #[arg(long, value_enum, default_value_t = ModeArg::Enter)]
        mode: ModeArg,
    },
    /// Render, then apply a submission, printing errors or the draft
    Submit {
        /// Form definition (YAML node tree)
        form: PathBuf,
        /// Record fixture (YAML: references + visit)
        fixture: PathBuf,
        /// Submission (JSON object: field name -> value or value list)
        submission: PathBuf,
        #[arg(long, value_enum, default_value_t = ModeArg::Enter)]
        mode: ModeArg,
    },
}

/// One-file fixture: the reference data plus the visit under entry.
#[derive(serde::Deserialize)]
struct Fixture {
    references: chartform_record::reference::StaticReferences,
    visit: chartform_record::visit::Visit,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Commands::Render { form, fixture, mode } => {
            let (compiled, registry, fixture) = load(&form, &fixture)?;
            let mut store = InMemoryStore::new();
            let visit_id = fixture.visit.id;
            store.insert_visit(fixture.visit);
            let clock = SystemClock;
            let mut session = FormEntrySession::open(
                mode.into(),
                visit_id,
                &store,
                EngineConfig::default(),
                &fixture.references,
                &clock,
            )?;
            let html = session.render(&compiled, &registry)?;
            println!("{html}");
        }
        Commands::Submit {
            form,
            fixture,
            submission,
            mode,
        } => {
            let (compiled, registry, fixture) = load(&form, &fixture)?;
            let submission = read_submission(&submission)?;
            let mut store = InMemoryStore::new();
            let visit_id = fixture.visit.id;
            store.insert_visit(fixture.visit);
            let clock = SystemClock;
            let mut session = FormEntrySession::open(
                mode.into(),
                visit_id,
                &store,
                EngineConfig::default(),
                &fixture.references,
                &clock,
            )?;
            session.render(&compiled, &registry)?;
            match session.submit(&mut store, &submission)? {
                SubmitOutcome::Invalid(errors) => {
                    for error in &errors {
                        eprintln!("{}: {}", error.field, error.message);
                    }
                    bail!("{} validation error(s)", errors.len());
                }
                SubmitOutcome::Applied(draft) => {
                    println!("{}", serde_json::to_string_pretty(&draft)?);
                    let visit = store.load_visit(visit_id)?;
                    eprintln!(
                        "applied: {} observation(s), {} order(s) now on visit {}",
                        visit.observations.len(),
                        visit.orders.len(),
                        visit.id
                    );
                }
            }
        }
    }
    Ok(())
}

fn load(
    form_path: &PathBuf,
    fixture_path: &PathBuf,
) -> anyhow::Result<(CompiledForm, TagRegistry, Fixture)> {
    let form_yaml = fs::read_to_string(form_path)
        .with_context(|| format!("reading form definition {}", form_path.display()))?;
    let root = chartform_engine::read_form_yaml(&form_yaml)?;
    let registry = TagRegistry::standard();
    let compiled = CompiledForm::compile(&root, &registry);

    let fixture_yaml = fs::read_to_string(fixture_path)
        .with_context(|| format!("reading fixture {}", fixture_path.display()))?;
    let fixture: Fixture =
        serde_yaml::from_str(&fixture_yaml).context("parsing record fixture")?;
    Ok((compiled, registry, fixture))
}

/// Submissions are JSON objects; each field maps to a string or a list of
/// strings, matching form-encoded semantics.
fn read_submission(path: &PathBuf) -> anyhow::Result<Submission> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading submission {}", path.display()))?;
    let parsed: HashMap<String, OneOrMany> =
        serde_json::from_str(&raw).context("parsing submission")?;
    let mut submission = Submission::new();
    for (field, value) in parsed {
        match value {
            OneOrMany::One(v) => submission.insert(&field, &v),
            OneOrMany::Many(vs) => {
                for v in vs {
                    submission.insert(&field, &v);
                }
            }
        }
    }
    Ok(submission)
}
