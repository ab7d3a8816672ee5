use anyhow::Result;
use argp::FromArgs;
use tracker_auth::{UserStore, generate_password};

use crate::util::load_config;

#[derive(FromArgs, PartialEq, Debug)]
/// Manage web UI accounts in the configured users file.
#[argp(subcommand, name = "users")]
pub struct Args {
    #[argp(subcommand)]
    command: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argp(subcommand)]
enum SubCommand {
    List(ListArgs),
    Add(AddArgs),
    ResetPassword(ResetPasswordArgs),
    Delete(DeleteArgs),
}

#[derive(FromArgs, PartialEq, Debug)]
/// List accounts.
#[argp(subcommand, name = "list")]
struct ListArgs {}

#[derive(FromArgs, PartialEq, Debug)]
/// Add an account.
#[argp(subcommand, name = "add")]
struct AddArgs {
    #[argp(positional)]
    /// account name
    username: String,
    #[argp(option)]
    /// email address
    email: Option<String>,
    #[argp(switch)]
    /// grant admin access
    admin: bool,
    #[argp(option)]
    /// password (default: generated and printed)
    password: Option<String>,
}

#[derive(FromArgs, PartialEq, Debug)]
/// Set a new password for an account.
#[argp(subcommand, name = "reset-password")]
struct ResetPasswordArgs {
    #[argp(positional)]
    /// account name
    username: String,
    #[argp(option)]
    /// new password (default: generated and printed)
    password: Option<String>,
}

#[derive(FromArgs, PartialEq, Debug)]
/// Delete an account.
#[argp(subcommand, name = "delete")]
struct DeleteArgs {
    #[argp(positional)]
    /// account name
    username: String,
}

pub async fn run(args: Args) -> Result<()> {
    let config = load_config()?;
    let store = UserStore::open(&config.auth.users_file).await?;
    execute(&store, args.command).await
}

async fn execute(store: &UserStore, command: SubCommand) -> Result<()> {
    match command {
        SubCommand::List(_) => {
            let users = store.list_users().await;
            if users.is_empty() {
                println!("No users in {}", store.path().display());
            }
            for user in users {
                println!(
                    "{:<24} {:<32} {}",
                    user.username,
                    user.email.as_deref().unwrap_or("-"),
                    if user.is_admin { "admin" } else { "user" }
                );
            }
        }
        SubCommand::Add(args) => {
            let (password, generated) = password_or_generated(args.password)?;
            store.add_user(&args.username, args.email, &password, args.admin).await?;
            println!("Added user {}", args.username);
            if generated {
                println!("Password: {password}");
            }
        }
        SubCommand::ResetPassword(args) => {
            let (password, generated) = password_or_generated(args.password)?;
            store.set_password(&args.username, &password).await?;
            println!("Password for {} updated", args.username);
            if generated {
                println!("Password: {password}");
            }
        }
        SubCommand::Delete(args) => {
            store.delete_user(&args.username, None).await?;
            println!("Deleted user {}", args.username);
        }
    }
    Ok(())
}

fn password_or_generated(password: Option<String>) -> Result<(String, bool)> {
    match password {
        Some(password) => Ok((password, false)),
        None => Ok((generate_password()?, true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_reset_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::open(dir.path().join("users.json")).await.unwrap();
        let add = AddArgs {
            username: "carol".to_string(),
            email: Some("carol@example.com".to_string()),
            admin: true,
            password: Some("first-password".to_string()),
        };
        execute(&store, SubCommand::Add(add)).await.unwrap();
        assert!(store.authenticate("carol", "first-password").await.is_some());

        let reset = ResetPasswordArgs { username: "carol".to_string(), password: None };
        execute(&store, SubCommand::ResetPassword(reset)).await.unwrap();
        assert!(store.authenticate("carol", "first-password").await.is_none());

        let delete = DeleteArgs { username: "carol".to_string() };
        execute(&store, SubCommand::Delete(delete)).await.unwrap();
        assert!(store.is_empty().await);

        let delete = DeleteArgs { username: "carol".to_string() };
        assert!(execute(&store, SubCommand::Delete(delete)).await.is_err());
    }
}
