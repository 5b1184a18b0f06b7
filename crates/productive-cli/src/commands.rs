//! Subcommands and their mapping onto `ApiClient` calls.

use std::io::{self, Write};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use productive_core::api::ApiError;
use productive_core::models::{NewTask, PageRequest, Task};
use productive_core::{ApiClient, Config, SessionContext, SessionState};
use tracing::debug;

/// Environment variable supplying the password for non-interactive login
const PASSWORD_ENV: &str = "PRODUCTIVE_PASSWORD";

#[derive(Parser)]
#[command(name = "productive", version, about = "ProductiveYou task manager client")]
pub struct Cli {
    /// Override the API base URL
    #[arg(long, global = true, env = "PRODUCTIVE_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and store tokens
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Create an account
    Register {
        #[arg(short, long)]
        username: String,
    },
    /// Sign out and forget stored tokens
    Logout,
    /// Show the signed-in user
    Whoami,
    #[command(subcommand)]
    Tasks(TaskCommand),
    #[command(subcommand)]
    Categories(CategoryCommand),
    #[command(subcommand)]
    Teams(TeamCommand),
    /// Show a profile (your own by default)
    Profile { id: Option<i64> },
}

#[derive(Subcommand)]
enum TaskCommand {
    List {
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        page_size: Option<u32>,
    },
    Show { id: i64 },
    Add(TaskArgs),
    Done { id: i64 },
    Undone { id: i64 },
    Delete { id: i64 },
}

#[derive(Args)]
struct TaskArgs {
    name: String,
    #[arg(short, long, default_value = "")]
    description: String,
    /// Due date as YYYY-MM-DD
    #[arg(long)]
    due: Option<String>,
    #[arg(long)]
    urgent: bool,
    #[arg(long)]
    category: Option<i64>,
    #[arg(long)]
    team: Option<i64>,
}

#[derive(Subcommand)]
enum CategoryCommand {
    List,
    Add { name: String },
    Rename { id: i64, name: String },
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum TeamCommand {
    List,
    Join { id: i64 },
    Delete { id: i64 },
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load().context("Failed to load config")?;
    if let Some(url) = cli.api_url {
        config.set_api_url_override(Some(url));
    }
    let session = SessionContext::new();
    let client = ApiClient::new(&config, session.clone())?;

    match cli.command {
        Command::Login { username } => login(&client, &mut config, username).await,
        Command::Register { username } => register(&client, &username).await,
        Command::Logout => {
            client.logout().await?;
            println!("Signed out.");
            Ok(())
        }
        Command::Whoami => {
            match session.initialize(&client).await {
                SessionState::Authenticated(s) => println!(
                    "{} (user {}, profile {})",
                    s.username,
                    s.user_id,
                    display_opt(s.profile_id)
                ),
                _ => println!("Not signed in."),
            }
            Ok(())
        }
        Command::Tasks(cmd) => tasks(&client, &config, cmd).await,
        Command::Categories(cmd) => categories(&client, cmd).await,
        Command::Teams(cmd) => teams(&client, cmd).await,
        Command::Profile { id } => {
            let profile = client.get_profile(id).await?;
            println!("{}", profile.username.as_deref().unwrap_or("(unknown user)"));
            if let Some(name) = profile.name.filter(|n| !n.is_empty()) {
                println!("  Name: {}", name);
            }
            if let Some(content) = profile.content.filter(|c| !c.is_empty()) {
                println!("  {}", content);
            }
            Ok(())
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn env_password() -> Option<String> {
    std::env::var(PASSWORD_ENV).ok().filter(|p| !p.is_empty())
}

fn prompt_password(label: &str) -> Result<String> {
    rpassword::prompt_password(format!("{}: ", label)).context("Failed to read password")
}

fn password(label: &str) -> Result<String> {
    match env_password() {
        Some(p) => Ok(p),
        None => prompt_password(label),
    }
}

/// Password and confirmation for registration. A password from the
/// environment serves as both so registration can run unattended.
fn registration_passwords(from_env: Option<String>) -> Result<(String, String)> {
    match from_env {
        Some(p) => Ok((p.clone(), p)),
        None => Ok((prompt_password("Password")?, prompt_password("Confirm password")?)),
    }
}

async fn login(client: &ApiClient, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match username.or_else(|| config.last_username.clone()) {
        Some(u) => u,
        None => prompt("Username")?,
    };
    let password = password("Password")?;

    let session = client.login(&username, &password).await?;
    config.last_username = Some(username);
    if let Err(e) = config.save() {
        debug!(error = %e, "Failed to save config");
    }
    println!("Signed in as {}.", session.username);
    Ok(())
}

async fn register(client: &ApiClient, username: &str) -> Result<()> {
    let (password1, password2) = registration_passwords(env_password())?;
    client.register(username, &password1, &password2).await?;
    println!("Account created. Run `productive login` to sign in.");
    Ok(())
}

fn parse_due_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid due date '{}', expected YYYY-MM-DD", value))
}

fn display_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn print_task(task: &Task) {
    let mark = if task.completed { "x" } else { " " };
    let urgent = if task.is_urgent { " !" } else { "" };
    let overdue = if task.is_overdue(Local::now().date_naive()) { " OVERDUE" } else { "" };
    println!(
        "[{}] {:>4}  {}{}  (due {}){}",
        mark,
        task.id,
        task.task_name,
        urgent,
        task.due_date_display(),
        overdue
    );
}

async fn tasks(client: &ApiClient, config: &Config, cmd: TaskCommand) -> Result<()> {
    match cmd {
        TaskCommand::List { page, page_size } => {
            let request = PageRequest::new(page, page_size.unwrap_or(config.page_size));
            let page = client.list_tasks(Some(request)).await?;
            if page.results.is_empty() {
                println!("No tasks.");
            }
            for task in &page.results {
                print_task(task);
            }
            println!("Page {} of {}", request.page, page.total_pages);
        }
        TaskCommand::Show { id } => {
            let task = client.get_task(id).await?;
            print_task(&task);
            if let Some(description) = task.description.as_deref().filter(|d| !d.is_empty()) {
                println!("  {}", description);
            }
            let category = task.category.as_ref().and_then(|c| c.name()).unwrap_or("No category assigned");
            let team = task.team.as_ref().and_then(|t| t.name()).unwrap_or("No team assigned");
            println!("  Category: {}", category);
            println!("  Team: {}", team);
            for file in &task.files {
                println!("  File: {}", file.file);
            }
        }
        TaskCommand::Add(args) => {
            let due_date = args.due.as_deref().map(parse_due_date).transpose()?;
            let task = client
                .create_task(&NewTask {
                    task_name: args.name,
                    description: args.description,
                    is_urgent: args.urgent,
                    completed: false,
                    due_date,
                    category: args.category,
                    team: args.team,
                })
                .await?;
            println!("Created task {}.", task.id);
        }
        TaskCommand::Done { id } => {
            client.set_task_completed(id, true).await?;
            println!("Task {} marked as completed.", id);
        }
        TaskCommand::Undone { id } => {
            client.set_task_completed(id, false).await?;
            println!("Task {} marked as incomplete.", id);
        }
        TaskCommand::Delete { id } => {
            client.delete_task(id).await?;
            println!("Task {} deleted.", id);
        }
    }
    Ok(())
}

async fn categories(client: &ApiClient, cmd: CategoryCommand) -> Result<()> {
    match cmd {
        CategoryCommand::List => {
            for category in client.list_categories(None).await?.results {
                println!("{:>4}  {}", category.id, category.name);
            }
        }
        CategoryCommand::Add { name } => {
            let category = client.create_category(&name).await?;
            println!("Created category {}.", category.id);
        }
        CategoryCommand::Rename { id, name } => {
            client.rename_category(id, &name).await?;
            println!("Category {} renamed.", id);
        }
        CategoryCommand::Delete { id } => {
            client.delete_category(id).await?;
            println!("Category {} deleted.", id);
        }
    }
    Ok(())
}

async fn teams(client: &ApiClient, cmd: TeamCommand) -> Result<()> {
    match cmd {
        TeamCommand::List => {
            for team in client.list_teams(None).await?.results {
                println!("{:>4}  {}  [{}]", team.id, team.name, team.member_names());
            }
        }
        TeamCommand::Join { id } => {
            client.join_team(id).await?;
            println!("Joined team {}.", id);
        }
        TeamCommand::Delete { id } => {
            client.delete_team(id).await?;
            println!("Team {} deleted.", id);
        }
    }
    Ok(())
}

/// Translate an error into the message shown to the user
pub fn user_message(error: &anyhow::Error) -> String {
    match error.downcast_ref::<ApiError>() {
        Some(ApiError::Validation(errors)) => errors.to_string(),
        Some(ApiError::NotFound(_)) => "Not found.".to_string(),
        Some(e) if e.is_auth_failure() => {
            "Session expired. Please log in again with `productive login`.".to_string()
        }
        Some(ApiError::NetworkError(_)) | Some(ApiError::Timeout) => {
            "Could not reach the server. Please try again later.".to_string()
        }
        Some(ApiError::ServerError(_)) => {
            "An unexpected error occurred. Please try again later.".to_string()
        }
        _ => format!("{:#}", error),
    }
}
