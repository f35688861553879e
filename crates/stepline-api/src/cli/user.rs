//! CLI user management subcommands.
//!
//! Users are the business entity the example workflow loads after its sleep.

use anyhow::{Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use stepline_core::repository::user::UserRepository;
use stepline_core::validation::is_valid_email;
use stepline_types::error::RepositoryError;
use stepline_types::user::{NewUser, User, UserUpdate};

use crate::state::AppState;

#[derive(Subcommand)]
pub enum UserCommand {
    /// Add a user.
    Add {
        /// Display name.
        #[arg(long)]
        name: String,

        /// Email address (must be unique).
        #[arg(long)]
        email: String,

        /// Mark the email as verified.
        #[arg(long)]
        verified: bool,

        /// Optional role.
        #[arg(long)]
        role: Option<String>,
    },

    /// Change fields of an existing user.
    Update {
        /// User ID.
        id: i64,

        /// New display name.
        #[arg(long)]
        name: Option<String>,

        /// New email address.
        #[arg(long)]
        email: Option<String>,

        /// Set the verified flag (true or false).
        #[arg(long)]
        verified: Option<bool>,

        /// New role.
        #[arg(long, conflicts_with = "clear_role")]
        role: Option<String>,

        /// Remove the role.
        #[arg(long)]
        clear_role: bool,
    },

    /// List users.
    List {
        #[arg(long, default_value = "50")]
        limit: u32,

        #[arg(long, default_value = "0")]
        offset: u32,
    },
}

/// Handle a user subcommand.
pub async fn handle_user_command(cmd: UserCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        UserCommand::Add {
            name,
            email,
            verified,
            role,
        } => {
            let new_user = NewUser {
                name,
                email,
                email_verified: verified,
                role,
            };
            add_user(state, &new_user, json).await
        }
        UserCommand::Update {
            id,
            name,
            email,
            verified,
            role,
            clear_role,
        } => {
            let update = UserUpdate {
                name,
                email,
                email_verified: verified,
                role: if clear_role { Some(None) } else { role.map(Some) },
            };
            update_user(state, id, &update, json).await
        }
        UserCommand::List { limit, offset } => list_users(state, limit, offset, json).await,
    }
}

async fn add_user(state: &AppState, new_user: &NewUser, json: bool) -> Result<()> {
    if new_user.name.trim().is_empty() {
        bail!("Name must not be empty");
    }
    if !is_valid_email(&new_user.email) {
        bail!("Invalid email format: {}", new_user.email);
    }

    let user = match state.user_repo.create_user(new_user).await {
        Ok(user) => user,
        Err(RepositoryError::Conflict(_)) => {
            bail!("A user with email '{}' already exists", new_user.email)
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        println!();
        println!(
            "  {} Created user {} ({})",
            style("✓").green().bold(),
            style(&user.name).cyan(),
            user.id
        );
        println!();
    }
    Ok(())
}

async fn update_user(state: &AppState, id: i64, update: &UserUpdate, json: bool) -> Result<()> {
    let user = apply_update(state, id, update).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        println!();
        println!(
            "  {} Updated user {} ({})",
            style("✓").green().bold(),
            style(&user.name).cyan(),
            user.id
        );
        println!();
    }
    Ok(())
}

async fn apply_update(state: &AppState, id: i64, update: &UserUpdate) -> Result<User> {
    if update.is_empty() {
        bail!("Nothing to update. Pass --name, --email, --verified, --role or --clear-role");
    }
    if update.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
        bail!("Name must not be empty");
    }
    if let Some(email) = &update.email {
        if !is_valid_email(email) {
            bail!("Invalid email format: {email}");
        }
    }

    match state.user_repo.update_user(id, update).await {
        Ok(user) => Ok(user),
        Err(RepositoryError::NotFound) => bail!("User {id} not found"),
        Err(RepositoryError::Conflict(_)) => bail!(
            "A user with email '{}' already exists",
            update.email.as_deref().unwrap_or_default()
        ),
        Err(e) => Err(e.into()),
    }
}

async fn list_users(state: &AppState, limit: u32, offset: u32, json: bool) -> Result<()> {
    let users = state.user_repo.list_users(limit, offset).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }

    if users.is_empty() {
        println!();
        println!("  No users yet. Add one with 'stepline user add'.");
        println!();
        return Ok(());
    }

    println!();
    println!("{}", user_table(&users));
    println!();
    Ok(())
}

fn user_table(users: &[User]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Email"),
            Cell::new("Verified"),
            Cell::new("Role"),
        ]);

    for user in users {
        table.add_row(vec![
            Cell::new(user.id),
            Cell::new(&user.name),
            Cell::new(&user.email),
            Cell::new(if user.email_verified { "yes" } else { "no" }),
            Cell::new(user.role.as_deref().unwrap_or("-")),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use stepline_infra::sqlite::pool::DatabasePool;
    use stepline_types::config::GlobalConfig;

    use super::*;

    async fn test_state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = PathBuf::from(dir.path());
        std::mem::forget(dir);

        let pool = DatabasePool::open_in(&data_dir).await.unwrap();
        AppState::from_pool(pool, GlobalConfig::default(), data_dir).unwrap()
    }

    async fn seed(state: &AppState, email: &str) -> User {
        state
            .user_repo
            .create_user(&NewUser {
                name: "Ada".to_string(),
                email: email.to_string(),
                email_verified: false,
                role: Some("admin".to_string()),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn update_changes_only_given_fields() {
        let state = test_state().await;
        let user = seed(&state, "ada@example.com").await;

        let update = UserUpdate {
            email_verified: Some(true),
            role: Some(None),
            ..UserUpdate::default()
        };
        let updated = apply_update(&state, user.id, &update).await.unwrap();

        assert_eq!(updated.name, "Ada");
        assert_eq!(updated.email, "ada@example.com");
        assert!(updated.email_verified);
        assert!(updated.role.is_none());

        let stored = state.user_repo.get_user(user.id).await.unwrap().unwrap();
        assert!(stored.email_verified);
        assert!(stored.role.is_none());
    }

    #[tokio::test]
    async fn update_reports_missing_user_and_taken_email() {
        let state = test_state().await;
        let ada = seed(&state, "ada@example.com").await;
        seed(&state, "grace@example.com").await;

        let rename = UserUpdate {
            name: Some("Ada L.".to_string()),
            ..UserUpdate::default()
        };
        let err = apply_update(&state, 9999, &rename).await.unwrap_err();
        assert_eq!(err.to_string(), "User 9999 not found");

        let taken = UserUpdate {
            email: Some("grace@example.com".to_string()),
            ..UserUpdate::default()
        };
        let err = apply_update(&state, ada.id, &taken).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn update_rejects_empty_and_invalid_input() {
        let state = test_state().await;
        let user = seed(&state, "ada@example.com").await;

        let err = apply_update(&state, user.id, &UserUpdate::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Nothing to update"));

        let bad_email = UserUpdate {
            email: Some("not-an-email".to_string()),
            ..UserUpdate::default()
        };
        let err = apply_update(&state, user.id, &bad_email).await.unwrap_err();
        assert!(err.to_string().contains("Invalid email"));
    }
}
