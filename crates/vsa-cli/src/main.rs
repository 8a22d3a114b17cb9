use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use vsa_collect::inventory::collect_local;
use vsa_collect::normalize::{attachment_records, database_records, session_records, target_records};
use vsa_collect::{AuditCache, CachedSources, CollectError, Collector, RemoteExec, SystemExec};
use vsa_core::{ComparisonMatrix, KindProfiles, MatrixDeclaration};
use vsa_reconcile::{Reconciler, SourceRecords};

mod config;
mod render;

use config::{config_path, AuditConfig};

#[derive(Parser)]
#[command(name = "vsa")]
#[command(about = "Volume state audit across database, hypervisors and targets", long_about = None)]
struct Cli {
    /// Config file (default: $VSA_CONFIG_PATH or <config dir>/vsa/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Collect every source, reconcile and print the report
    Audit(AuditArgs),
    /// Print this hypervisor's inventory as JSON
    HvInventory,
    /// Print the comparison matrix
    Matrix,
}

#[derive(Args, Debug)]
struct AuditArgs {
    /// Remove cached source data before collecting
    #[arg(short = 'c', long)]
    clear_cache: bool,
    /// Neither read nor write the cache
    #[arg(short = 'n', long)]
    no_cache: bool,
    #[arg(short = 'd', long)]
    cache_dir: Option<PathBuf>,
    /// Hypervisor host expression, e.g. `cc[1-8]-p`
    #[arg(short = 'H', long)]
    hosts: Option<String>,
    #[arg(long)]
    target_hosts: Option<String>,
    #[arg(long, value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Table,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Commands::Audit(args) => {
            let path = config_path(cli.config.as_deref());
            debug!(path = %path.display(), "loading config");
            let mut config = AuditConfig::load(&path)?;
            apply_overrides(&mut config, &args);
            print!("{}", audit(&SystemExec, &config, &args)?);
            Ok(())
        }
        Commands::HvInventory => {
            let inventory = collect_local(&SystemExec).context("failed to collect inventory")?;
            println!(
                "{}",
                serde_json::to_string(&inventory).context("failed to encode inventory")?
            );
            Ok(())
        }
        Commands::Matrix => {
            let (matrix, _) = default_tables()?;
            print!("{}", render::matrix(&matrix));
            Ok(())
        }
    }
}

fn init_logging(debug: bool) {
    let level = if debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("VSA_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn apply_overrides(config: &mut AuditConfig, args: &AuditArgs) {
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(hosts) = &args.hosts {
        config.hosts = hosts.clone();
    }
    if let Some(hosts) = &args.target_hosts {
        config.target_hosts = hosts.clone();
    }
}

fn default_tables() -> Result<(ComparisonMatrix, KindProfiles)> {
    let profiles = KindProfiles::default();
    let matrix = ComparisonMatrix::from_declaration(&MatrixDeclaration::default(), &profiles)
        .context("invalid comparison matrix")?;
    Ok((matrix, profiles))
}

/// Collects whatever the cache cannot supply, reconciles and renders the
/// report. A source that fails to collect is reported as empty and is not
/// cached.
fn audit<E: RemoteExec + ?Sized>(
    exec: &E,
    config: &AuditConfig,
    args: &AuditArgs,
) -> Result<String> {
    // Fail on a bad matrix before touching any remote host.
    let (matrix, profiles) = default_tables()?;
    let settings = config.collect_settings()?;

    let cache = AuditCache::new(&config.cache_dir);
    let use_cache = !args.no_cache;
    let _lock = if use_cache || args.clear_cache {
        Some(cache.lock().context("failed to lock cache")?)
    } else {
        None
    };

    if args.clear_cache {
        cache.clear().context("failed to clear cache")?;
    }

    let cached = if use_cache {
        cache.load(&settings.hosts)
    } else {
        CachedSources::default()
    };

    let collector = Collector::new(exec, &settings);

    let database = match cached.database {
        Some(records) => records,
        None => match collected("database", collector.database()) {
            Some(records) => {
                if use_cache {
                    cache.store_database(&records)?;
                }
                records
            }
            None => Vec::new(),
        },
    };

    let hypervisors = match cached.hypervisors {
        Some(inventories) => inventories,
        None => match collected("hypervisors", collector.hypervisors()) {
            Some(inventories) => {
                if use_cache {
                    cache.store_hypervisors(&inventories)?;
                    cache.store_hosts(&settings.hosts)?;
                }
                inventories
            }
            None => BTreeMap::new(),
        },
    };

    let targets = match cached.targets {
        Some(targets) => targets,
        None => match collected("targets", collector.targets()) {
            Some(targets) => {
                if use_cache {
                    cache.store_targets(&targets)?;
                }
                targets
            }
            None => Vec::new(),
        },
    };

    let missing = settings
        .hosts
        .iter()
        .filter(|host| !hypervisors.contains_key(*host))
        .count();
    if missing > 0 {
        warn!(missing, "hypervisors without inventory");
    }

    let mut sources = SourceRecords::new();
    sources.extend(database_records(&database));
    sources.extend(session_records(&hypervisors));
    sources.extend(attachment_records(&hypervisors));
    sources.extend(target_records(&targets));

    let run = Reconciler::new(&matrix, &profiles).reconcile(&sources);
    let summary = render::Summary::of(&run);
    info!(
        records = summary.report.records_admitted,
        rows = summary.rows,
        created = summary.report.rows_created,
        matched = summary.report.rows_matched,
        "reconciled volume state"
    );
    for (presence, count) in &summary.presence {
        info!(presence = %presence, count, "rows by presence");
    }

    match args.format {
        Format::Table => Ok(render::table(&run.rows)),
        Format::Json => Ok(format!("{}\n", render::json(&run)?)),
    }
}

fn collected<T>(source: &str, result: Result<T, CollectError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            let err = anyhow::Error::new(err);
            warn!(source, error = %format!("{err:#}"), "source unavailable; reporting without it");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::path::Path;
    use tempfile::TempDir;
    use vsa_collect::CommandOutput;

    enum Reply {
        Stdout(&'static str),
        ExitFailure,
        NotInstalled,
    }

    /// Answers each program with its scripted replies in call order.
    /// Unscripted programs are treated as not installed.
    struct ScriptedFleet {
        replies: RefCell<BTreeMap<&'static str, VecDeque<Reply>>>,
        calls: RefCell<Vec<String>>,
    }

    impl ScriptedFleet {
        fn new() -> Self {
            Self {
                replies: RefCell::new(BTreeMap::new()),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn on(self, program: &'static str, reply: Reply) -> Self {
            self.replies
                .borrow_mut()
                .entry(program)
                .or_default()
                .push_back(reply);
            self
        }

        fn called(&self, program: &str) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|call| call.split(' ').next() == Some(program))
                .count()
        }
    }

    impl RemoteExec for ScriptedFleet {
        fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CollectError> {
            self.calls
                .borrow_mut()
                .push(format!("{program} {}", args.join(" ")));
            let reply = self
                .replies
                .borrow_mut()
                .get_mut(program)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Reply::NotInstalled);
            match reply {
                Reply::Stdout(stdout) => Ok(CommandOutput {
                    success: true,
                    status: "exit status: 0".to_string(),
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                }),
                Reply::ExitFailure => Ok(CommandOutput {
                    success: false,
                    status: "exit status: 255".to_string(),
                    stdout: String::new(),
                    stderr: "ssh: connect to host m3-p port 22: Connection refused".to_string(),
                }),
                Reply::NotInstalled => Err(CollectError::Launch {
                    program: program.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
                }),
            }
        }
    }

    const INSTANCES: &str = "42 uuid-a cc1-p nova active\n";
    const VOLUMES: &str = "26;uuid-a;/dev/vdb;alice;proj;10.1.0.2:3260,1 iqn.2010-10.org.openstack:volume-0000001a;in-use\n";
    const INVENTORY: &str = "cc1-p: {\"iscsiadm\": [{\"ip\": \"10.1.0.2\", \"port\": \"3260\", \"mode\": \"tcp\", \"lun\": \"1\", \"volume_id\": \"volume-0000001a\"}]}\n";
    const TARGETS: &str = "v1-p: iqn.2010-10.org.openstack:volume-000000ff  online   0\n";

    fn config(cache_dir: &Path) -> AuditConfig {
        AuditConfig {
            hosts: "cc1-p".to_string(),
            target_hosts: "v1-p".to_string(),
            cache_dir: cache_dir.to_path_buf(),
            ..AuditConfig::default()
        }
    }

    fn args(no_cache: bool) -> AuditArgs {
        AuditArgs {
            clear_cache: false,
            no_cache,
            cache_dir: None,
            hosts: None,
            target_hosts: None,
            format: Format::Table,
        }
    }

    fn presences(report: &str) -> Vec<String> {
        report
            .lines()
            .skip(1)
            .map(|line| line.split_whitespace().take(2).collect::<Vec<_>>().join(" "))
            .collect()
    }

    #[test]
    fn unreachable_database_still_reports_other_sources() {
        let dir = TempDir::new().expect("temp dir");
        let fleet = ScriptedFleet::new()
            .on("ssh", Reply::ExitFailure)
            .on("pdsh", Reply::Stdout(INVENTORY))
            .on("pdsh", Reply::Stdout(TARGETS));

        let report = audit(&fleet, &config(dir.path()), &args(true)).expect("report");
        assert_eq!(
            presences(&report),
            vec!["--i- volume-0000001a", "t--- volume-000000ff"]
        );
    }

    #[test]
    fn missing_pdsh_still_reports_the_database() {
        let dir = TempDir::new().expect("temp dir");
        let fleet = ScriptedFleet::new()
            .on("ssh", Reply::Stdout(INSTANCES))
            .on("ssh", Reply::Stdout(VOLUMES));

        let report = audit(&fleet, &config(dir.path()), &args(true)).expect("report");
        assert_eq!(presences(&report), vec!["-d-- volume-0000001a"]);
        assert_eq!(fleet.called("pdsh"), 2);
    }

    #[test]
    fn failed_source_is_not_cached() {
        let dir = TempDir::new().expect("temp dir");
        let cache_dir = dir.path().join("cache");
        let fleet = ScriptedFleet::new()
            .on("ssh", Reply::ExitFailure)
            .on("pdsh", Reply::Stdout(INVENTORY))
            .on("pdsh", Reply::Stdout(TARGETS));

        audit(&fleet, &config(&cache_dir), &args(false)).expect("report");
        assert!(!cache_dir.join("db.json").exists());
        assert!(cache_dir.join("hv.json").exists());
        assert!(cache_dir.join("hv.hosts.json").exists());
        assert!(cache_dir.join("it.json").exists());
    }

    #[test]
    fn no_cache_writes_nothing() {
        let dir = TempDir::new().expect("temp dir");
        let cache_dir = dir.path().join("cache");
        let fleet = ScriptedFleet::new()
            .on("ssh", Reply::Stdout(INSTANCES))
            .on("ssh", Reply::Stdout(VOLUMES))
            .on("pdsh", Reply::Stdout(INVENTORY))
            .on("pdsh", Reply::Stdout(TARGETS));

        audit(&fleet, &config(&cache_dir), &args(true)).expect("report");
        assert!(!cache_dir.exists());
    }

    #[test]
    fn second_run_reuses_the_cache() {
        let dir = TempDir::new().expect("temp dir");
        let config = config(&dir.path().join("cache"));
        let first = ScriptedFleet::new()
            .on("ssh", Reply::Stdout(INSTANCES))
            .on("ssh", Reply::Stdout(VOLUMES))
            .on("pdsh", Reply::Stdout(INVENTORY))
            .on("pdsh", Reply::Stdout(TARGETS));
        let collected = audit(&first, &config, &args(false)).expect("first report");
        assert_eq!(
            presences(&collected),
            vec!["-di- volume-0000001a", "t--- volume-000000ff"]
        );

        let second = ScriptedFleet::new();
        let reused = audit(&second, &config, &args(false)).expect("second report");
        assert_eq!(reused, collected);
        assert!(second.calls.borrow().is_empty());
    }

    #[test]
    fn clear_cache_forces_collection() {
        let dir = TempDir::new().expect("temp dir");
        let config = config(&dir.path().join("cache"));
        let first = ScriptedFleet::new()
            .on("ssh", Reply::Stdout(INSTANCES))
            .on("ssh", Reply::Stdout(VOLUMES))
            .on("pdsh", Reply::Stdout(INVENTORY))
            .on("pdsh", Reply::Stdout(TARGETS));
        audit(&first, &config, &args(false)).expect("first report");

        let second = ScriptedFleet::new()
            .on("ssh", Reply::Stdout(INSTANCES))
            .on("ssh", Reply::Stdout(VOLUMES))
            .on("pdsh", Reply::Stdout(INVENTORY))
            .on("pdsh", Reply::Stdout(TARGETS));
        let mut clearing = args(false);
        clearing.clear_cache = true;
        audit(&second, &config, &clearing).expect("second report");
        assert_eq!(second.called("ssh"), 2);
        assert_eq!(second.called("pdsh"), 2);
    }
}
