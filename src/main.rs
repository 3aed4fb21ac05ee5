use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use rust_fieldaudit::diagnostics::TracingSink;
use rust_fieldaudit::model::load_schema;
use rust_fieldaudit::sql::{collect_sql_fields, AliasPolicy, CommentMarker};
use rust_fieldaudit::summary;
use rust_fieldaudit::upstream::layer_path_for;
use rust_fieldaudit::{
    analyze_upstream, apply_changes, audit_model_fields, comment_out_upstream, perform_analysis,
    AnalyzeOptions, AuditConfig, FieldKey,
};

#[derive(Parser)]
#[command(name = "rust-fieldaudit")]
#[command(author, version, about = "Find and comment out unused Power BI model fields")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report which model fields are used and how
    Analyze {
        /// Report archive (.pbix) or unpacked report folder
        #[arg(short, long = "report", required = true)]
        reports: Vec<PathBuf>,

        /// Semantic model folder (holds tables/)
        #[arg(short, long)]
        model: PathBuf,

        /// SQL models folder, enables the sibling composition check
        #[arg(short, long)]
        sql: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Attach confidence, line numbers and dependency statistics
        #[arg(long)]
        detailed: bool,

        /// Print every fact recorded for one Table.Column
        #[arg(long)]
        field: Option<String>,
    },
    /// Comment unused fields out of the SQL models
    Apply {
        #[arg(short, long = "report", required = true)]
        reports: Vec<PathBuf>,

        #[arg(short, long)]
        model: PathBuf,

        #[arg(short, long)]
        sql: PathBuf,

        /// Field to comment out (Table.Column), repeatable
        #[arg(short, long = "field")]
        fields: Vec<String>,

        /// Comment out every eligible unused field
        #[arg(long, conflicts_with = "fields")]
        all_unused: bool,
    },
    /// List the projected column aliases of every SQL model
    Fields {
        #[arg(short, long)]
        sql: PathBuf,

        /// Ignore aliases that are SQL keywords
        #[arg(long)]
        strict: bool,

        #[arg(long)]
        json: bool,
    },
    /// Check whether fields removed from reporting can also leave the upstream layer
    Upstream {
        /// Reporting-layer SQL models folder
        #[arg(short, long)]
        reporting: PathBuf,

        #[arg(short, long)]
        model: PathBuf,

        /// Removed field (Table.Column), repeatable
        #[arg(short, long = "field")]
        fields: Vec<String>,

        /// Audit every column of the upstream layer instead
        #[arg(long, conflicts_with = "fields")]
        layer_fields: bool,

        /// Comment out the removable fields
        #[arg(long)]
        apply: bool,

        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_fields(fields: &[String]) -> Result<Vec<FieldKey>> {
    fields
        .iter()
        .map(|f| {
            FieldKey::parse(f).with_context(|| format!("Expected Table.Column, got '{}'", f))
        })
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn log_progress(percent: u8) {
    tracing::debug!("progress {}%", percent);
}

fn analyze_options(
    reports: Vec<PathBuf>,
    model: PathBuf,
    sql: Option<PathBuf>,
    config: AuditConfig,
    detailed: bool,
) -> AnalyzeOptions {
    AnalyzeOptions {
        report_paths: reports,
        model_path: model,
        sql_path: sql,
        config,
        detailed,
    }
}

fn run_upstream(
    reporting: &Path,
    model: &Path,
    fields: &[String],
    layer_fields: bool,
    apply: bool,
    json: bool,
    config: &AuditConfig,
) -> Result<()> {
    let mut sink = TracingSink::new();
    let audit = if layer_fields {
        let layer = layer_path_for(reporting, config)?;
        let collected = collect_sql_fields(&layer, AliasPolicy::Permissive, &mut sink);
        audit_model_fields(&layer, reporting, &collected, config, &mut sink)
    } else {
        if fields.is_empty() {
            bail!("Pass at least one --field or --layer-fields");
        }
        let schema = load_schema(model, config, &mut sink)?;
        let keys = parse_fields(fields)?;
        analyze_upstream(reporting, &schema, &keys, config, &mut sink, &mut log_progress)?
    };

    if json {
        print_json(&audit)?;
    } else {
        summary::print_upstream_audit(&audit);
    }

    if apply {
        let marker = CommentMarker::now(config.comment_style);
        let tally = comment_out_upstream(&audit, config, &marker, &mut sink);
        summary::print_mutation_tally(&tally);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = AuditConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            reports,
            model,
            sql,
            json,
            detailed,
            field,
        } => {
            let options = analyze_options(reports, model, sql, config, detailed);
            let mut sink = TracingSink::new();
            let output = perform_analysis(&options, &mut sink, &mut log_progress)?;

            if let Some(field) = field {
                let key = FieldKey::parse(&field)
                    .with_context(|| format!("Expected Table.Column, got '{}'", field))?;
                summary::print_field_details(&output, &key);
            } else if json {
                print_json(&output)?;
            } else {
                summary::print_analysis(&output);
            }
        }
        Commands::Apply {
            reports,
            model,
            sql,
            fields,
            all_unused,
        } => {
            let selected = if all_unused {
                None
            } else if fields.is_empty() {
                bail!("Pass at least one --field or --all-unused");
            } else {
                Some(parse_fields(&fields)?)
            };

            let options =
                analyze_options(reports, model, Some(sql.clone()), config.clone(), false);
            let mut sink = TracingSink::new();
            let output = perform_analysis(&options, &mut sink, &mut log_progress)?;
            let selected = selected.unwrap_or_else(|| output.unused_fields());
            tracing::info!("{} fields selected for comment-out", selected.len());

            let outcome = apply_changes(&output, &sql, &selected, &config, &mut sink);
            summary::print_mutation_outcome(&outcome);
            if outcome.failed > 0 {
                bail!("{} tables could not be updated", outcome.failed);
            }
        }
        Commands::Fields { sql, strict, json } => {
            let policy = if strict {
                AliasPolicy::KeywordAware
            } else {
                AliasPolicy::Permissive
            };
            let mut sink = TracingSink::new();
            let fields = collect_sql_fields(&sql, policy, &mut sink);
            if json {
                print_json(&fields)?;
            } else {
                summary::print_sql_fields(&fields);
            }
        }
        Commands::Upstream {
            reporting,
            model,
            fields,
            layer_fields,
            apply,
            json,
        } => {
            run_upstream(
                &reporting,
                &model,
                &fields,
                layer_fields,
                apply,
                json,
                &config,
            )?;
        }
    }

    Ok(())
}
