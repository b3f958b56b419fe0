use std::process::ExitCode;

use clap::Parser;
use pgsql_driver::translation::{BindNamePattern, DEFAULT_BINDNAME_FORMAT, Dialect, apply_limit, rewrite_placeholders};

#[derive(Parser, Debug)]
#[command(author, version, about = "Rewrite a portable query into native PostgreSQL syntax")]
struct Args {
    /// Query using `?` or `:name` placeholders.
    query: String,
    #[arg(long, default_value_t = 0)]
    limit: u64,
    #[arg(long, default_value_t = 0)]
    offset: u64,
    /// Treat the query as UPDATE/DELETE when applying a limit.
    #[arg(long)]
    manip: bool,
    #[arg(long, value_enum, default_value = "postgres")]
    dialect: Dialect,
    #[arg(long, default_value = DEFAULT_BINDNAME_FORMAT)]
    bindname_format: String,
}

fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), pgsql_driver::PgDriverError> {
    let bind_name = BindNamePattern::new(&args.bindname_format)?;
    let limited = apply_limit(&args.query, args.manip, args.limit, args.offset, args.dialect);
    tracing::debug!(sql = limited.sql(), "limit applied");
    let native = rewrite_placeholders(limited.sql(), args.dialect, &bind_name)?;

    println!("{}", native.sql);
    for (index, placeholder) in native.placeholders.iter().enumerate() {
        println!("{} -> {placeholder}", args.dialect.marker(index + 1));
    }
    if let Some(subselect) = limited.row_identity_subselect() {
        println!("row identity: {subselect}");
    }
    Ok(())
}
