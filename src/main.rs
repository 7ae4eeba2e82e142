use clap::{Parser, Subcommand};
use color_eyre::Result;
use offcache::{
  CacheStorage, Config, Controller, DetachedWrites, FetchHandler, HttpNetwork, MemoryStorage,
  Request, SqliteStorage,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "Offline-capable request interception cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin to serve; enough on its own when no config file exists
  #[arg(short, long)]
  origin: Option<String>,

  /// Keep the cache in memory instead of the on-disk database
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Populate the offline namespace for this build
  Install,
  /// Install this build, then delete namespaces of older builds
  Activate,
  /// Run a request through the interception strategies
  Fetch(RequestArgs),
  /// Show which strategy a request would get
  Classify(RequestArgs),
  /// List namespaces and their entry counts
  Namespaces,
}

#[derive(clap::Args, Debug)]
struct RequestArgs {
  /// Absolute URL or path relative to the origin
  url: String,

  #[arg(short = 'X', long, default_value = "GET")]
  method: String,

  /// Accept header to send
  #[arg(long)]
  accept: Option<String>,
}

impl RequestArgs {
  fn to_request(&self, config: &Config) -> Result<Request> {
    let request = Request::new(&self.method, config.resolve(&self.url)?);
    Ok(match &self.accept {
      Some(accept) => request.with_header("accept", accept),
      None => request,
    })
  }
}

fn load_config(args: &Args) -> Result<Config> {
  Config::load_with_origin(args.config.as_deref(), args.origin.as_deref())
}

async fn run<S: CacheStorage + 'static>(
  config: &Config,
  storage: Arc<S>,
  command: Command,
) -> Result<()> {
  let network = Arc::new(HttpNetwork::new()?);
  let controller = Controller::from_config(config, storage, network, DetachedWrites::default())?;

  match command {
    Command::Install => {
      controller.on_install().await?;
      println!("installed {}", controller.namespaces().key(offcache::cache::OFFLINE));
    }
    Command::Activate => {
      controller.on_install().await?;
      let report = controller.on_activate().await?;
      for key in &report.deleted {
        println!("deleted  {}", key);
      }
      for key in &report.retained {
        println!("retained {}", key);
      }
    }
    Command::Fetch(req) => {
      let request = req.to_request(config)?;
      let served = controller.on_fetch(&request).await;
      controller.engine().settle().await;

      match served.response {
        Some(response) => println!(
          "{} {:?} {} bytes",
          response.status,
          served.source,
          response.body.len()
        ),
        None => println!("no response ({:?}, offline artifact not installed)", served.source),
      }
    }
    Command::Classify(req) => {
      let request = req.to_request(config)?;
      println!("{}", controller.classify(&request));
    }
    Command::Namespaces => {
      let namespaces = controller.namespaces();
      for key in namespaces.list_all().await? {
        let count = namespaces.storage().entry_count(&key).await?;
        let marker = if namespaces.is_current(&key) { "*" } else { " " };
        println!("{} {} ({} entries)", marker, key, count);
      }
    }
  }

  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = load_config(&args)?;

  let _log_guard = offcache::logging::init(config.logging_enabled(), config.log_file.as_deref())?;

  if args.ephemeral {
    run(&config, Arc::new(MemoryStorage::new()), args.command).await
  } else {
    let storage = SqliteStorage::open_at(&config.store_path()?)?;
    run(&config, Arc::new(storage), args.command).await
  }
}
