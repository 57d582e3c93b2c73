use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing::warn;

use tally::api::types::{ItemDraft, WelcomeAction};
use tally::api::Remote;
use tally::error::RuleViolation;
use tally::sync::BindingState;
use tally::{ApiError, Config, TallyClient};

#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(about = "Command-line client for the Tally list service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tally/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Log in, registering first if the account does not exist yet
  Login {
    email: String,
    /// Account password (falls back to TALLY_PASSWORD)
    #[arg(long)]
    password: Option<String>,
  },
  /// End the current session
  Logout,
  /// Show the logged-in account
  Me,
  /// List your lists
  Lists,
  /// Show the items of a list
  Items {
    list_id: String,
    /// Only items with this completion state (true or false)
    #[arg(long)]
    completed: Option<bool>,
  },
  /// Add an item to a list
  Add {
    list_id: String,
    name: String,
    /// Category to file the item under
    #[arg(long)]
    category: Option<String>,
    /// Link to attach
    #[arg(long)]
    link: Option<String>,
  },
  /// Flip an item between open and completed
  Toggle { list_id: String, item_id: String },
  /// Show one item in full, content included
  Show { list_id: String, item_id: String },
  /// Send a password reset email
  Forgot { email: String },
  /// Set a new password using the token from the reset email
  ResetPassword {
    token: String,
    /// New password (falls back to TALLY_PASSWORD)
    #[arg(long)]
    password: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let filter = tracing_subscriber::EnvFilter::try_from_env("TALLY_LOG")
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let client = TallyClient::new(&config)?;

  if let Err(report) = run(&client, &args.command).await {
    if matches!(
      report.downcast_ref::<ApiError>(),
      Some(ApiError::NotAuthenticated)
    ) {
      if let Some(target) = resume_line(&args.command) {
        if let Err(e) = client.session().set_resume_target(&target) {
          warn!("failed to park resume target: {}", e);
        }
      }
      eprintln!("You are not logged in. Run: tally login <email>");
      std::process::exit(1);
    }
    return Err(report);
  }

  Ok(())
}

async fn run(client: &TallyClient, command: &Command) -> Result<()> {
  match command {
    Command::Login { email, password } => login(client, email, password.clone()).await,
    Command::Logout => {
      client.logout().await?;
      println!("Logged out.");
      Ok(())
    }
    Command::Me => {
      let me = settled(client.me().resolve().await)?;
      println!(
        "{} (account since {})",
        me.email,
        me.created_at.format("%Y-%m-%d")
      );
      Ok(())
    }
    Command::Lists => {
      let lists = settled(client.lists().resolve().await)?;
      if lists.is_empty() {
        println!("No lists yet.");
        return Ok(());
      }
      for list in lists {
        let members = list.viewers.len() + list.editors.len();
        if members > 0 {
          println!("{:<8} {} (shared with {})", list.id, list.name, members);
        } else {
          println!("{:<8} {}", list.id, list.name);
        }
      }
      Ok(())
    }
    Command::Items { list_id, completed } => {
      let items = match completed {
        // A filtered listing is a one-off view; ask the service directly.
        Some(completed) => client.api().fetch_items(list_id, Some(*completed)).await?,
        None => settled(client.items(list_id).resolve().await)?,
      };
      if items.is_empty() {
        println!("No items.");
        return Ok(());
      }
      for item in items {
        let mark = if item.completed { "x" } else { " " };
        println!("[{}] {:<8} {}", mark, item.id, item.name);
      }
      Ok(())
    }
    Command::Add {
      list_id,
      name,
      category,
      link,
    } => {
      let draft = ItemDraft {
        name: name.clone(),
        category_id: category.clone(),
        link: link.clone(),
      };
      let item = client.mutator().create_item(list_id, &draft).await?;
      println!("Added {} to {}.", item.id, list_id);
      Ok(())
    }
    Command::Toggle { list_id, item_id } => {
      let item = settled(client.item(list_id, item_id).resolve().await)?;
      let item = client
        .mutator()
        .set_item_completion(list_id, item_id, !item.completed)
        .await?;
      if item.completed {
        println!("Completed {}.", item.name);
      } else {
        println!("Reopened {}.", item.name);
      }
      Ok(())
    }
    Command::Show { list_id, item_id } => {
      let item = settled(client.item(list_id, item_id).resolve().await)?;
      let state = if item.completed { "completed" } else { "open" };
      println!("{} ({})", item.name, state);
      if let Some(link) = &item.link {
        println!("link: {}", link);
      }
      let content = settled(client.item_content(list_id, item_id).resolve().await)?;
      if !content.content.is_empty() {
        println!("\n{}", content.content);
      }
      Ok(())
    }
    Command::Forgot { email } => {
      client.api().send_password_forgotten_email(email).await?;
      println!("If {} has an account, a reset email is on its way.", email);
      Ok(())
    }
    Command::ResetPassword { token, password } => {
      let password = match password {
        Some(p) => p.clone(),
        None => Config::password_from_env()?,
      };
      client.api().reset_password(token, &password).await?;
      println!("Password updated. You can log in now.");
      Ok(())
    }
  }
}

/// Log in, walking whichever onboarding step the service says is next.
async fn login(client: &TallyClient, email: &str, password: Option<String>) -> Result<()> {
  let password = match password {
    Some(p) => p,
    None => {
      // A register run that is waiting on email verification left the
      // credentials in the session store; reuse them instead of re-prompting.
      let state = client.session().load();
      match (state.pending_email.as_deref(), state.pending_password) {
        (Some(pending), Some(p)) if pending == email => p,
        _ => Config::password_from_env()?,
      }
    }
  };

  match client.api().welcome_action(email).await? {
    WelcomeAction::Login => match client.login(email, &password).await {
      Ok(()) => {
        println!("Logged in as {}.", email);
        print_resume_hint(client);
        Ok(())
      }
      Err(ApiError::BusinessRule(RuleViolation::EmailNotVerified)) => {
        if client.api().is_email_verified(email, &password).await? {
          client.login(email, &password).await?;
          println!("Logged in as {}.", email);
          print_resume_hint(client);
        } else {
          client.api().send_verification_email(email, &password).await?;
          println!(
            "Email not verified yet. We sent a new verification email to {}.",
            email
          );
        }
        Ok(())
      }
      Err(e) => Err(e.into()),
    },
    WelcomeAction::Register => {
      let verification_sent = client.api().register(email, &password).await?;
      if verification_sent {
        if let Err(e) = client.session().remember_credentials(email, &password) {
          warn!("failed to remember onboarding credentials: {}", e);
        }
        println!(
          "Account created. Check {} for a verification email, then run the same login command again.",
          email
        );
      } else {
        client.login(email, &password).await?;
        println!("Account created and logged in as {}.", email);
      }
      Ok(())
    }
  }
}

/// Collapse a settled binding into its data, or the error that kept it empty.
fn settled<T>(state: BindingState<T>) -> Result<T, ApiError> {
  match (state.data, state.error) {
    (Some(data), _) => Ok(data),
    (None, Some(error)) => Err(error),
    (None, None) => Err(ApiError::Unknown),
  }
}

/// The command line to suggest after the next login. Reads only; nobody wants
/// a write replayed.
fn resume_line(command: &Command) -> Option<String> {
  match command {
    Command::Me => Some("me".to_string()),
    Command::Lists => Some("lists".to_string()),
    Command::Items { list_id, .. } => Some(format!("items {}", list_id)),
    Command::Show { list_id, item_id } => Some(format!("show {} {}", list_id, item_id)),
    _ => None,
  }
}

fn print_resume_hint(client: &TallyClient) {
  match client.session().take_resume_target() {
    Ok(Some(target)) => println!("Pick up where you left off: tally {}", target),
    Ok(None) => {}
    Err(e) => warn!("failed to read resume target: {}", e),
  }
}
