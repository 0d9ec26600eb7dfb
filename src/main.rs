use apptrack_lib::{
    list_applications, set_setting, App, ApplicationTable, Column, NewApplication, PersonalInfo,
    RecordView, RuntimeConfig, TableObserver, DATE_FORMAT,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{process::exit, sync::Arc, time::Duration};
use tracing::{error, info};

#[derive(Debug, Clone, Parser)]
#[command(
    about = "Track job applications locally with optional Google Sheets sync",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self, app: &App) -> Result<()> {
        match self.command {
            Command::Add(opts) => run_add(app, opts).await,
            Command::List(opts) => run_list(app, opts),
            Command::Edit(opts) => run_edit(app, opts).await,
            Command::SetStatus(opts) => run_set_status(app, opts).await,
            Command::Delete(opts) => run_delete(app, opts).await,
            Command::Sync { action } => run_sync(app, action).await,
            Command::Watch(opts) => run_watch(app, opts).await,
            Command::Settings { action } => run_settings(app, action).await,
            Command::Info { action } => run_info(app, action),
            Command::Status => run_status(app),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Save a new application dated today with status Submitted.
    #[command(override_usage = "apptrack add [options] <company> <position>")]
    Add(AddOptions),

    /// List applications, optionally filtered by a search term.
    List(ListOptions),

    /// Change one field of the application at a row.
    #[command(override_usage = "apptrack edit <row> <column> <value>")]
    Edit(EditOptions),

    /// Change the status of the application at a row.
    #[command(override_usage = "apptrack set-status <row> <status>")]
    SetStatus(SetStatusOptions),

    /// Delete the applications at the given rows.
    #[command(override_usage = "apptrack delete <row>...")]
    Delete(DeleteOptions),

    /// Pull from or push to the Google Sheet once.
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },

    /// Keep pulling from the Google Sheet on a timer until interrupted.
    Watch(WatchOptions),

    /// Show or change the settings file.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Show or change the personal info clipboard entries.
    Info {
        #[command(subcommand)]
        action: InfoAction,
    },

    /// Show file locations, sync state and runtime configuration.
    Status,
}

#[derive(Parser, Clone, Debug)]
struct AddOptions {
    /// Company name.
    #[arg(required = true, value_name = "company")]
    pub company: String,

    /// Position title.
    #[arg(required = true, value_name = "position")]
    pub position: String,

    /// Application portal URL.
    #[arg(short, long, value_name = "url", default_value = "")]
    pub url: String,
}

#[derive(Parser, Clone, Debug)]
struct ListOptions {
    /// Case-insensitive filter across all columns.
    #[arg(short, long, value_name = "term")]
    pub search: Option<String>,

    /// Print JSON instead of tab-separated rows.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Clone, Debug)]
struct EditOptions {
    /// Row as printed by `apptrack list`.
    #[arg(value_name = "row")]
    pub row: usize,

    /// Company, Position, URL, Date or Status.
    #[arg(value_name = "column")]
    pub column: String,

    #[arg(value_name = "value", allow_hyphen_values = true)]
    pub value: String,
}

#[derive(Parser, Clone, Debug)]
struct SetStatusOptions {
    #[arg(value_name = "row")]
    pub row: usize,

    /// Submitted, Rejected, Interview or Offer.
    #[arg(value_name = "status")]
    pub status: String,
}

#[derive(Parser, Clone, Debug)]
struct DeleteOptions {
    #[arg(required = true, value_name = "row")]
    pub rows: Vec<usize>,
}

#[derive(Parser, Clone, Debug)]
struct WatchOptions {
    /// Seconds between pulls. Defaults to SYNC_INTERVAL_SECS.
    #[arg(short, long, value_name = "secs")]
    pub interval: Option<u64>,
}

#[derive(Debug, Clone, Subcommand)]
enum SyncAction {
    /// Replace local data with the sheet if it differs.
    Pull,
    /// Overwrite the sheet with local data.
    Push,
}

#[derive(Debug, Clone, Subcommand)]
enum SettingsAction {
    Show,
    /// Set one key, e.g. `SPREADSHEET_ID abc123` or `ENABLE_GOOGLE_SYNC true`.
    Set {
        #[arg(value_name = "key")]
        key: String,
        #[arg(value_name = "value")]
        value: String,
    },
    /// Flip between the Light and Dark theme.
    Theme,
}

#[derive(Debug, Clone, Subcommand)]
enum InfoAction {
    Show,
    Set {
        #[arg(value_name = "label")]
        label: String,
        #[arg(value_name = "value")]
        value: String,
    },
    Remove {
        #[arg(value_name = "label")]
        label: String,
    },
}

struct RefreshPrinter;

impl TableObserver for RefreshPrinter {
    fn on_refresh(&self, table: &ApplicationTable) {
        println!("table refreshed: {} applications", table.len());
    }
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let app = App::initialize(RuntimeConfig::from_env()).context("failed to start")?;
    cli.run(&app).await
}

async fn run_add(app: &App, opts: AddOptions) -> Result<()> {
    let application = NewApplication::new(opts.company, opts.position, opts.url);
    app.driver().on_record_added(application).await?;
    println!("Application saved successfully!");
    Ok(())
}

fn run_list(app: &App, opts: ListOptions) -> Result<()> {
    let views = list_applications(app, opts.search.as_deref());
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }
    for view in &views {
        print_row(view);
    }
    Ok(())
}

fn print_row(view: &RecordView) {
    let date = view
        .date_applied
        .map(|date| date.format(DATE_FORMAT).to_string())
        .unwrap_or_default();
    println!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        view.row, view.company, view.position, view.portal_url, date, view.status
    );
}

async fn run_edit(app: &App, opts: EditOptions) -> Result<()> {
    let column = Column::parse(&opts.column)?;
    app.driver()
        .on_record_edited(opts.row, column, &opts.value)
        .await?;
    Ok(())
}

async fn run_set_status(app: &App, opts: SetStatusOptions) -> Result<()> {
    app.driver()
        .on_record_edited(opts.row, Column::Status, &opts.status)
        .await?;
    Ok(())
}

async fn run_delete(app: &App, opts: DeleteOptions) -> Result<()> {
    let removed = app.driver().on_records_deleted(&opts.rows).await?;
    println!("{removed} application(s) deleted");
    Ok(())
}

async fn run_sync(app: &App, action: SyncAction) -> Result<()> {
    match action {
        SyncAction::Pull => {
            let outcome = app.driver().pull_once().await;
            println!("{}", serde_json::to_string(&outcome)?);
        }
        SyncAction::Push => {
            let outcome = app.driver().push_now().await;
            println!("{}", serde_json::to_string(&outcome)?);
        }
    }
    Ok(())
}

async fn run_watch(app: &App, opts: WatchOptions) -> Result<()> {
    let interval = opts
        .interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| app.config().sync_interval());
    app.driver().subscribe(Arc::new(RefreshPrinter));
    let timer = app.driver().spawn_timer(interval);
    info!(interval_secs = interval.as_secs(), "watching google sheet; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    timer.stop().await;
    Ok(())
}

async fn run_settings(app: &App, action: SettingsAction) -> Result<()> {
    let settings = match action {
        SettingsAction::Show => app.settings().load()?,
        SettingsAction::Set { key, value } => set_setting(app, &key, &value).await?,
        SettingsAction::Theme => app.settings().toggle_theme()?,
    };
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn run_info(app: &App, action: InfoAction) -> Result<()> {
    let mut info: PersonalInfo = app.personal_info()?;
    match action {
        InfoAction::Show => {}
        InfoAction::Set { label, value } => {
            info.set(label, value);
            app.save_personal_info(&info)?;
        }
        InfoAction::Remove { label } => {
            if !info.remove(&label) {
                anyhow::bail!("no personal info entry named {label:?}");
            }
            app.save_personal_info(&info)?;
        }
    }
    for (label, value) in info.entries() {
        println!("{label}\t{value}");
    }
    Ok(())
}

fn run_status(app: &App) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&app.status()?)?);
    Ok(())
}
