use clap::{Parser, Subcommand, ValueEnum};
use registrar::model;
use registrar::seed::seed_sample_data;
use registrar::{ConcurrencyToken, Registrar};
use std::collections::BTreeSet;
use std::process;

/// Registrar CLI: inspect and maintain a student-records data directory
#[derive(Parser)]
#[command(name = "registrar", version, about)]
struct Cli {
    /// Path to the data directory
    #[arg(long, env = "REGISTRAR_DATA_DIR", default_value = ".")]
    data_dir: String,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Get a single record by business id
    Get {
        /// Collection name (students, instructors, departments, courses, enrollments)
        collection: String,
        id: i64,
    },

    /// List every record in a collection
    List {
        collection: String,
    },

    /// Create a record (ids are allocated, except for courses)
    Insert {
        collection: String,
        /// Field values (e.g. --field last_name=Alexander)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Update a record
    Update {
        collection: String,
        id: i64,
        /// Field values (the full input shape of the collection)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
        /// Concurrency token last read; omit to force the write
        #[arg(long)]
        token: Option<String>,
    },

    /// Delete a record, applying guards and cascades
    Delete {
        collection: String,
        id: i64,
        /// Report whether the delete would be allowed without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Set the instructors of a course
    Assign {
        course_id: i64,
        /// Instructor ids; none clears the course
        instructor_ids: Vec<i64>,
    },

    /// Allocate the next value of a sequence
    Allocate {
        name: String,
    },

    /// Show every sequence counter
    Counters,

    /// Check mirrored data for drift
    Reconcile {
        /// Rewrite derived data so the store is consistent
        #[arg(long)]
        repair: bool,
    },

    /// Show collection sizes and counters
    Status,

    /// Force re-indexing from disk
    Rebuild {
        /// Only rebuild a specific collection
        #[arg(long)]
        collection: Option<String>,
    },

    /// Load the sample data set into an empty store
    Seed,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let registrar = Registrar::open(&cli.data_dir)?;
    log::debug!("Opened data directory {}", cli.data_dir);

    match cli.command {
        Command::Get { collection, id } => {
            let doc = registrar.get_dynamic(&collection, id)?;
            print_output(&doc, &cli.format)?;
        }

        Command::List { collection } => {
            let docs = registrar.list_dynamic(&collection)?;
            print_output(&docs, &cli.format)?;
        }

        Command::Insert { collection, fields } => {
            let doc = registrar.insert_dynamic(&collection, fields_to_value(&fields))?;
            print_output(&doc, &cli.format)?;
        }

        Command::Update {
            collection,
            id,
            fields,
            token,
        } => {
            let token = token
                .as_deref()
                .map(ConcurrencyToken::from_base64)
                .transpose()?;
            let doc = registrar.update_dynamic(
                &collection,
                id,
                fields_to_value(&fields),
                token.as_ref(),
            )?;
            print_output(&doc, &cli.format)?;
        }

        Command::Delete {
            collection,
            id,
            dry_run,
        } => {
            if dry_run {
                let doc = registrar.get_dynamic(&collection, id)?;
                let cascade = registrar.cascade();
                let allowed = match collection.as_str() {
                    model::DEPARTMENTS => cascade.can_delete_department(id)?,
                    model::COURSES => cascade.can_delete_course(id)?,
                    _ => true,
                };
                print_output(
                    &serde_json::json!({
                        "dry_run": true,
                        "allowed": allowed,
                        "would_delete": { "collection": collection, "id": id },
                        "document": doc,
                    }),
                    &cli.format,
                )?;
            } else {
                let outcome = registrar.delete_dynamic(&collection, id)?;
                print_output(&serde_json::to_value(outcome)?, &cli.format)?;
            }
        }

        Command::Assign {
            course_id,
            instructor_ids,
        } => {
            let desired: BTreeSet<i64> = instructor_ids.into_iter().collect();
            let outcome = registrar
                .synchronizer()
                .set_course_instructors(course_id, &desired)?;
            print_output(&serde_json::to_value(outcome)?, &cli.format)?;
        }

        Command::Allocate { name } => {
            let value = registrar.sequences().allocate(&name)?;
            print_output(
                &serde_json::json!({ "name": name, "value": value }),
                &cli.format,
            )?;
        }

        Command::Counters => {
            let counters = registrar.sequences().counters()?;
            print_output(&serde_json::to_value(counters)?, &cli.format)?;
        }

        Command::Reconcile { repair } => {
            let report = registrar.reconcile(repair)?;
            print_output(
                &serde_json::json!({
                    "consistent": report.is_consistent(),
                    "repaired": report.repaired,
                    "issues": report.issues,
                }),
                &cli.format,
            )?;
        }

        Command::Status => {
            let result = registrar.status()?;
            print_output(&result, &cli.format)?;
        }

        Command::Rebuild { collection } => {
            registrar.store().rebuild(collection.as_deref())?;
            print_output(&serde_json::json!({ "ok": true, "rebuilt": true }), &cli.format)?;
        }

        Command::Seed => {
            let summary = seed_sample_data(&registrar)?;
            print_output(&serde_json::to_value(summary)?, &cli.format)?;
        }
    }

    Ok(())
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn fields_to_value(fields: &[(String, String)]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, val) in fields {
        // Numbers, booleans, arrays and null parse as JSON; anything else is a string
        let json_val = serde_json::from_str(val).unwrap_or(serde_json::Value::String(val.clone()));
        map.insert(key.clone(), json_val);
    }
    serde_json::Value::Object(map)
}
