mod app;
mod cache;
mod commands;
mod config;
mod editor;
mod error;
mod event;
mod proxy;
mod sheet;
mod timing;
mod transport;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::app::App;
use crate::cache::{NoopStorage, SnapshotStore, SqliteStorage};
use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::proxy::{CacheProxy, Gateway, ProxySettings, ProxyStore};
use crate::sheet::{FieldKey, FieldMap, Row};
use crate::transport::{HttpTransport, Request, RequestMode, Transport};

type Client = App<Gateway<HttpTransport>, Box<dyn SnapshotStore>>;

#[derive(Parser, Debug)]
#[command(name = "cardshelf")]
#[command(about = "Browse and edit a card inventory kept in a published spreadsheet")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cardshelf/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// List cards, optionally filtered
  List {
    /// monster, spell or trap (any language); anything else shows all
    #[arg(long)]
    category: Option<String>,
    /// Case-insensitive text to look for in any field
    #[arg(long)]
    search: Option<String>,
    /// Reload past every cache
    #[arg(long)]
    refresh: bool,
  },
  /// Print every field of one card
  Show { id: String },
  /// Add a new card
  Add {
    /// Field assignment such as name="Dark Magician"; repeatable
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
  },
  /// Change fields of an existing card
  Edit {
    id: String,
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
  },
  /// Add a copy of an existing card, with optional changes
  Duplicate {
    id: String,
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
  },
  /// Browse interactively: type to search, `:help` for commands
  Browse,
  /// Manage the local cache proxy
  #[command(subcommand)]
  Proxy(ProxyCommand),
}

#[derive(Subcommand, Debug)]
enum ProxyCommand {
  /// Precache the application shell and make this version active
  Install,
  /// Show the active version and its stores
  Status,
  /// Fetch a URL through the proxy
  Fetch {
    url: Url,
    /// Treat the request as a page navigation
    #[arg(long, conflicts_with = "no_cors")]
    navigate: bool,
    /// Fetch without reading a cross-origin response, which is never stored
    #[arg(long)]
    no_cors: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging()?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let settings = ProxySettings::from_config(&config)?;
  let network = HttpTransport::new(config.network.fetch_timeout(), &settings.origin)?;

  match args.command {
    Commands::Proxy(command) => {
      let proxy = CacheProxy::new(network, ProxyStore::open()?, settings);
      run_proxy_command(&proxy, command).await
    }
    command => {
      let gateway = Gateway::open(network, ProxyStore::open(), settings);
      run_client(gateway, &config, command).await
    }
  }
}

async fn run_client(gateway: Gateway<HttpTransport>, config: &Config, command: Commands) -> Result<()> {
  gateway.start().await;

  let snapshots: Box<dyn SnapshotStore> = match SqliteStorage::open() {
    Ok(storage) => Box::new(storage),
    Err(e) => {
      warn!("Snapshot storage unavailable, offline copy disabled: {}", e);
      Box::new(NoopStorage)
    }
  };
  let mut app: Client = App::new(gateway, snapshots, config);

  match command {
    Commands::List {
      category,
      search,
      refresh,
    } => {
      load(&mut app, refresh).await;
      app.ensure_available()?;
      if let Some(category) = category {
        app.set_filter(&category);
      }
      if let Some(search) = search {
        app.set_query(&search);
      }
      print_rows(&app);
    }
    Commands::Show { id } => {
      load(&mut app, false).await;
      print_card(&app, &id)?;
    }
    Commands::Add { set } => {
      load(&mut app, false).await;
      app.open_new();
      app.apply_assignments(&set)?;
      save(&mut app).await?;
    }
    Commands::Edit { id, set } => {
      load(&mut app, false).await;
      app.open_edit(&id)?;
      app.apply_assignments(&set)?;
      save(&mut app).await?;
    }
    Commands::Duplicate { id, set } => {
      load(&mut app, false).await;
      app.open_edit(&id)?;
      app.duplicate()?;
      app.apply_assignments(&set)?;
      save(&mut app).await?;
    }
    Commands::Browse => browse(&mut app, config.network.debounce()).await?,
    Commands::Proxy(command) => return Err(eyre!("{:?} is not a client command", command)),
  }

  Ok(())
}

/// Log to a file in the data directory so stdout only carries output.
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = Config::data_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create data directory: {}", e))?;

  let appender = tracing_appender::rolling::never(&log_dir, "cardshelf.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_env("CARDSHELF_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

async fn run_proxy_command(proxy: &CacheProxy<HttpTransport>, command: ProxyCommand) -> Result<()> {
  match command {
    ProxyCommand::Install => {
      proxy.install().await?;
      println!("Installed {}", proxy.settings().version);
    }
    ProxyCommand::Status => {
      proxy.start().await?;
      let active = proxy.store().active_generation()?;
      println!("version: {}", proxy.settings().version);
      println!("state:   {:?}", proxy.state());
      println!("active:  {}", active.as_deref().unwrap_or("-"));
      for name in proxy.store().store_names()? {
        println!("store:   {} ({} entries)", name, proxy.store().entry_count(&name)?);
      }
    }
    ProxyCommand::Fetch {
      url,
      navigate,
      no_cors,
    } => {
      proxy.start().await?;
      let request = if navigate {
        Request::navigate(url)
      } else if no_cors {
        Request::get(url).with_mode(RequestMode::NoCors)
      } else {
        Request::get(url)
      };
      let response = proxy.send(request).await?;
      eprintln!("{} ({})", response.status, response.kind.as_str());
      println!("{}", response.text());
    }
  }
  Ok(())
}

async fn load(app: &mut Client, force_refresh: bool) {
  app.load(force_refresh).await;
  eprintln!("{}", app.status_line());
}

async fn save(app: &mut Client) -> Result<()> {
  let outcome = app.save().await?;
  println!("{}", outcome.message);
  Ok(())
}

const LIST_COLUMNS: [FieldKey; 5] = [
  FieldKey::Identity,
  FieldKey::Name,
  FieldKey::Category,
  FieldKey::Rarity,
  FieldKey::Quantity,
];

fn print_rows(app: &Client) {
  let fields = &app.state().fields;
  let rows = app.view();
  for row in &rows {
    println!("{}", format_row(fields, row));
  }
  eprintln!("{} card(s)", rows.len());
}

fn format_row(fields: &FieldMap, row: &Row) -> String {
  LIST_COLUMNS
    .iter()
    .map(|key| fields.read(row, *key))
    .collect::<Vec<_>>()
    .join("\t")
}

fn print_card(app: &Client, id: &str) -> Result<()> {
  let state = app.state();
  let (position, row) = state
    .dataset
    .find_by_identity(&state.fields, id)
    .ok_or_else(|| eyre!("No card with id {:?}", id))?;

  println!("row: {}", position);
  for key in FieldKey::ALL {
    if state.fields.has(key) {
      println!("{}: {}", key.name(), state.fields.read(row, key));
    }
  }
  Ok(())
}

fn print_values(app: &Client, field: &str) -> Result<()> {
  let key = FieldKey::from_name(field).ok_or_else(|| eyre!("Unknown field {:?}", field))?;
  let values = app.state().suggestions.get(key);
  if values.is_empty() {
    eprintln!("No known values for {}", key.name());
  }
  for value in values {
    println!("{}", value);
  }
  Ok(())
}

async fn browse(app: &mut Client, debounce: std::time::Duration) -> Result<()> {
  load(app, false).await;
  print_rows(app);

  let mut events = EventHandler::new(debounce);
  let mut last_notice = None;

  while let Some(event) = events.next().await {
    match event {
      Event::Search(query) => {
        app.set_query(&query);
        print_rows(app);
      }
      Event::Unknown(line) => eprintln!("Unknown command {}, try :help", line),
      Event::Closed => break,
      Event::Command(cmd, args) => {
        if cmd.name == "quit" {
          break;
        }
        if let Err(e) = run_browse_command(app, cmd.name, &args).await {
          eprintln!("{}", e);
        }
      }
    }

    let notice = app.notice();
    if notice.is_some() && notice != last_notice {
      eprintln!("» {}", notice.as_deref().unwrap_or_default());
    }
    last_notice = notice;
  }

  Ok(())
}

async fn run_browse_command(app: &mut Client, name: &str, args: &str) -> Result<()> {
  match name {
    "category" => {
      app.set_filter(args);
      print_rows(app);
    }
    "refresh" => {
      load(app, true).await;
      print_rows(app);
    }
    "show" => print_card(app, args)?,
    "values" => print_values(app, args)?,
    "new" => app.open_new(),
    "edit" => app.open_edit(args)?,
    "duplicate" => app.duplicate()?,
    "set" => app.apply_assignments(&[args])?,
    "save" => save(app).await?,
    "cancel" => app.close_editor(),
    "offline" => app.set_online(false),
    "online" => app.set_online(true),
    "status" => eprintln!("{}", app.status_line()),
    "help" => {
      for cmd in commands::COMMANDS {
        eprintln!("{:<34} {}", cmd.usage, cmd.description);
      }
    }
    _ => return Err(eyre!("Unknown command {}", name)),
  }
  Ok(())
}
