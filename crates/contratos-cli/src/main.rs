mod display;

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use contratos_core::parse::parse_date;
use contratos_core::{HeaderMeta, LogKind};
use contratos_import::{DuplicatePolicy, Engine};
use contratos_store::rows::DEFAULT_PER_PAGE;
use contratos_store::{DashboardFilter, DuckStore, ItemFilter, ItemOrder, SortDir};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "contratos", version, about = "Contract movement import and reconciliation")]
struct Cli {
    /// DuckDB database file [default: <runtime-dir>/contratos.duckdb].
    #[arg(long, env = "CONTRATOS_DB", global = true, conflicts_with = "in_memory")]
    db: Option<PathBuf>,

    /// Use a throwaway in-memory database instead of a file.
    #[arg(long, global = true)]
    in_memory: bool,

    /// Directory for audit.jsonl, last_import.json and import_history.jsonl.
    #[arg(long, env = "CONTRATOS_RUNTIME_DIR", default_value = "runtime", global = true)]
    runtime_dir: PathBuf,

    /// Reference date for recomputation (defaults to the local date).
    #[arg(long, value_parser = parse_date, global = true)]
    today: Option<NaiveDate>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        #[arg(long, env = "CONTRATOS_BIND", default_value = "127.0.0.1:8000")]
        bind: SocketAddr,
    },
    /// Stage, inspect, commit or discard movement imports.
    #[command(subcommand)]
    Import(ImportCommand),
    /// Manage contract headers.
    #[command(subcommand)]
    Headers(HeadersCommand),
    /// Recompute every header, or one contract, against today.
    Recalc {
        #[arg(long)]
        contract: Option<String>,
    },
    /// List contract items.
    Items {
        #[command(flatten)]
        filter: ItemFilterArgs,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = DEFAULT_PER_PAGE)]
        per_page: usize,
    },
    /// Print the dashboard.
    Dashboard {
        /// Client name substring.
        #[arg(long)]
        client: Option<String>,
        #[arg(long, value_parser = parse_date)]
        from: Option<NaiveDate>,
        #[arg(long, value_parser = parse_date)]
        to: Option<NaiveDate>,
    },
    /// Export items as CSV.
    Export {
        /// Output file (stdout when omitted).
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        filter: ItemFilterArgs,
    },
    /// Show audit entries, newest first.
    Logs {
        #[arg(long)]
        contract: Option<String>,
        /// `item` or `header`.
        #[arg(long)]
        kind: Option<LogKind>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum ImportCommand {
    /// Parse and stage a movement file without applying it.
    Preview { file: PathBuf },
    /// Show a batch with its records and exclusions.
    Show { id: i64 },
    /// Apply a staged batch.
    Commit { id: i64 },
    /// Drop a staged batch.
    Discard { id: i64 },
    /// Summary of the last committed import.
    Last,
    /// Committed imports, newest first.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum HeadersCommand {
    /// Register a header.
    Add(HeaderArgs),
    /// Replace a header's metadata.
    Edit(HeaderArgs),
    /// Show one header with its active items.
    Show { number: String },
    /// List every header.
    List,
    /// Bulk-register headers from a delimited file.
    Import {
        file: PathBuf,
        #[arg(long, default_value_t = DuplicatePolicy::Skip)]
        on_duplicate: DuplicatePolicy,
    },
}

#[derive(Args, Debug, Default)]
struct ItemFilterArgs {
    /// Client name substring.
    #[arg(long)]
    client: Option<String>,
    /// Contract number substring.
    #[arg(long)]
    contract: Option<String>,
    /// Asset substring.
    #[arg(long)]
    asset: Option<String>,
    /// Include returned items.
    #[arg(long)]
    include_returned: bool,
    #[arg(long, default_value_t = ItemOrder::ShippedOn)]
    order_by: ItemOrder,
    #[arg(long, default_value_t = SortDir::Desc)]
    order_dir: SortDir,
}

impl From<ItemFilterArgs> for ItemFilter {
    fn from(a: ItemFilterArgs) -> Self {
        ItemFilter {
            client: a.client,
            contract: a.contract,
            asset: a.asset,
            include_returned: a.include_returned,
            order_by: a.order_by,
            order_dir: a.order_dir,
        }
    }
}

#[derive(Args, Debug)]
struct HeaderArgs {
    #[arg(long)]
    number: String,
    #[arg(long)]
    client_name: String,
    #[arg(long)]
    client_code: Option<String>,
    #[arg(long, default_value = "")]
    cnpj: String,
    #[arg(long, default_value_t = 0)]
    term: i32,
    /// Annual adjustment index, e.g. `6%` or `0,06`.
    #[arg(long, default_value = "")]
    index: String,
    #[arg(long, default_value = "")]
    seller: String,
    #[arg(long, value_parser = parse_date)]
    start: Option<NaiveDate>,
}

impl From<HeaderArgs> for HeaderMeta {
    fn from(a: HeaderArgs) -> Self {
        HeaderMeta {
            contract_number: a.number,
            client_code: a.client_code,
            client_name: a.client_name,
            cnpj: a.cnpj,
            term_months: a.term,
            adjustment_index: a.index,
            seller: a.seller,
            start_date: a.start,
        }
    }
}

const DEFAULT_DB_FILE: &str = "contratos.duckdb";

impl Cli {
    /// Database file to open, or `None` for an in-memory store.
    fn db_path(&self) -> Option<PathBuf> {
        if self.in_memory {
            return None;
        }
        Some(
            self.db
                .clone()
                .unwrap_or_else(|| self.runtime_dir.join(DEFAULT_DB_FILE)),
        )
    }
}

fn open_engine(cli: &Cli) -> anyhow::Result<Engine> {
    let store = match cli.db_path() {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            DuckStore::open_persistent(&path)
                .with_context(|| format!("opening database {}", path.display()))?
        }
        None => {
            tracing::warn!("using an in-memory database, nothing will persist");
            DuckStore::open().context("opening in-memory database")?
        }
    };
    let engine = Engine::new(store, &cli.runtime_dir);
    Ok(match cli.today {
        Some(today) => engine.with_today(today),
        None => engine,
    })
}

fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!("contratos v{}", env!("CARGO_PKG_VERSION"));
    let mut engine = open_engine(&cli)?;

    match cli.command {
        Command::Serve { bind } => {
            contratos_server::serve(engine, bind)
                .await
                .with_context(|| format!("serving on {bind}"))?;
        }

        Command::Import(cmd) => match cmd {
            ImportCommand::Preview { file } => {
                let bytes = read_file(&file)?;
                let batch = engine
                    .preview(&bytes, file_name(&file).as_deref())
                    .context("staging import")?;
                display::print_batch_card(&batch);
                println!("commit with: contratos import commit {}", batch.id);
            }
            ImportCommand::Show { id } => {
                display::print_batch_card(&engine.batch(id)?);
            }
            ImportCommand::Commit { id } => {
                let outcome = engine
                    .commit(id)
                    .with_context(|| format!("committing batch {id}"))?;
                display::print_commit(&outcome);
            }
            ImportCommand::Discard { id } => {
                engine.discard(id)?;
                println!("batch {id} discarded");
            }
            ImportCommand::Last => match engine.last_import()? {
                Some(summary) => display::print_summary(&summary),
                None => println!("no import committed yet"),
            },
            ImportCommand::History { limit } => {
                let history = engine.import_history(limit)?;
                if history.is_empty() {
                    println!("no import committed yet");
                }
                display::print_history(&history);
            }
        },

        Command::Headers(cmd) => match cmd {
            HeadersCommand::Add(args) => {
                let header = engine.register_header(args.into())?;
                display::print_header_card(&engine.header_detail(&header.meta.contract_number)?);
            }
            HeadersCommand::Edit(args) => {
                let number = args.number.clone();
                engine.edit_header(&number, args.into())?;
                display::print_header_card(&engine.header_detail(&number)?);
            }
            HeadersCommand::Show { number } => {
                display::print_header_card(&engine.header_detail(&number)?);
            }
            HeadersCommand::List => {
                let batches = engine.store().headers_overview()?;
                let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
                println!("{}", arrow::util::pretty::pretty_format_batches(&batches)?);
                println!("{rows} headers");
            }
            HeadersCommand::Import { file, on_duplicate } => {
                let bytes = read_file(&file)?;
                let report = engine
                    .import_headers(&bytes, on_duplicate)
                    .with_context(|| format!("importing headers from {}", file.display()))?;
                display::print_header_report(&report);
            }
        },

        Command::Recalc { contract: None } => {
            let report = engine.recalc_all()?;
            println!(
                "recalculated {} headers as of {} ({} changed)",
                report.headers,
                engine.today(),
                report.changed
            );
        }
        Command::Recalc {
            contract: Some(number),
        } => {
            let out = engine
                .recalc_contract(&number)
                .with_context(|| format!("recalculating contract {number}"))?;
            let state = if out.changed { "changed" } else { "unchanged" };
            println!(
                "recalculated contract {} ({} items) as of {}: {state}",
                out.header.meta.contract_number,
                out.items,
                engine.today()
            );
        }

        Command::Items {
            filter,
            page,
            per_page,
        } => {
            let listing = engine.list_items(&filter.into(), page, per_page)?;
            display::print_item_page(&listing);
        }

        Command::Dashboard { client, from, to } => {
            let filter = DashboardFilter { client, from, to };
            display::print_dashboard(&engine.dashboard(&filter)?);
        }

        Command::Export { out, filter } => {
            let filter = ItemFilter::from(filter);
            let rows = match &out {
                Some(path) => {
                    let f = File::create(path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    let mut w = BufWriter::new(f);
                    let rows = engine.export_csv(&mut w, &filter)?;
                    w.flush()?;
                    rows
                }
                None => {
                    let stdout = io::stdout();
                    let mut lock = stdout.lock();
                    let rows = engine.export_csv(&mut lock, &filter)?;
                    lock.flush()?;
                    rows
                }
            };
            tracing::info!(rows, "export finished");
        }

        Command::Logs {
            contract,
            kind,
            limit,
        } => {
            let entries = engine.logs(kind, contract.as_deref(), limit)?;
            if entries.is_empty() {
                println!("no entries");
            }
            for entry in &entries {
                display::print_log(entry);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_import_commit() {
        let cli = Cli::try_parse_from(["contratos", "--db", "c.duckdb", "import", "commit", "7"]).unwrap();
        assert_eq!(cli.db.as_deref(), Some(Path::new("c.duckdb")));
        assert!(matches!(cli.command, Command::Import(ImportCommand::Commit { id: 7 })));
    }

    #[test]
    fn parses_header_import_policy_and_dates() {
        let cli = Cli::try_parse_from([
            "contratos",
            "headers",
            "import",
            "h.csv",
            "--on-duplicate",
            "update",
            "--today",
            "01/08/2025",
        ])
        .unwrap();
        assert_eq!(cli.today, NaiveDate::from_ymd_opt(2025, 8, 1));
        match cli.command {
            Command::Headers(HeadersCommand::Import { on_duplicate, .. }) => {
                assert_eq!(on_duplicate, DuplicatePolicy::Update)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(Cli::try_parse_from(["contratos", "headers", "import", "h.csv", "--on-duplicate", "merge"]).is_err());
    }

    #[test]
    fn database_defaults_to_a_file_under_the_runtime_dir() {
        let cli = Cli::try_parse_from(["contratos", "--runtime-dir", "rt", "recalc"]).unwrap();
        assert_eq!(cli.db_path(), Some(Path::new("rt").join(DEFAULT_DB_FILE)));
        let cli = Cli::try_parse_from(["contratos", "--db", "c.duckdb", "recalc"]).unwrap();
        assert_eq!(cli.db_path(), Some(PathBuf::from("c.duckdb")));
        let cli = Cli::try_parse_from(["contratos", "--in-memory", "recalc"]).unwrap();
        assert_eq!(cli.db_path(), None);
        assert!(Cli::try_parse_from(["contratos", "--db", "c.duckdb", "--in-memory", "recalc"]).is_err());
    }

    fn cli_in(runtime: &Path, cmd: &[&str]) -> Cli {
        let mut argv = vec![
            "contratos".to_string(),
            "--runtime-dir".to_string(),
            runtime.to_string_lossy().into_owned(),
        ];
        argv.extend(cmd.iter().map(|s| s.to_string()));
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn staged_batch_survives_until_the_next_run() {
        let tmp = tempfile::TempDir::new().unwrap();
        let runtime = tmp.path().join("runtime");

        let mut engine = open_engine(&cli_in(&runtime, &["headers", "list"])).unwrap();
        engine
            .register_header(HeaderMeta {
                contract_number: "123".into(),
                client_name: "ACME".into(),
                cnpj: "00.000.000/0001-00".into(),
                term_months: 12,
                seller: "Ana".into(),
                ..HeaderMeta::default()
            })
            .unwrap();
        let batch = engine
            .preview(
                b"contrato,cod_cli,ativo,tp_transacao,data_mov,valor_mensal\n123,001,A1,E,2025-08-01,100\n",
                Some("mov.csv"),
            )
            .unwrap();
        drop(engine);
        assert!(runtime.join(DEFAULT_DB_FILE).exists());

        let id = batch.id.to_string();
        let mut engine = open_engine(&cli_in(&runtime, &["import", "commit", &id])).unwrap();
        let out = engine.commit(batch.id).unwrap();
        assert_eq!(out.summary.applied, 1);
        assert_eq!(engine.header_detail("123").unwrap().items.len(), 1);
    }

    #[test]
    fn parses_item_filters() {
        let cli = Cli::try_parse_from([
            "contratos",
            "items",
            "--client",
            "acme",
            "--include-returned",
            "--order-by",
            "valor_mensal",
            "--order-dir",
            "asc",
            "--per-page",
            "50",
        ])
        .unwrap();
        match cli.command {
            Command::Items { filter, page, per_page } => {
                let filter = ItemFilter::from(filter);
                assert_eq!(filter.client.as_deref(), Some("acme"));
                assert!(filter.include_returned);
                assert_eq!(filter.order_by, ItemOrder::MonthlyValue);
                assert_eq!(filter.order_dir, SortDir::Asc);
                assert_eq!((page, per_page), (1, 50));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(Cli::try_parse_from(["contratos", "export", "--order-by", "preco"]).is_err());
    }
}
