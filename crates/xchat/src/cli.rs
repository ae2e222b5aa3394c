//! Admin command line over the service layer.
//!
//! Every command prints one JSON document. Commands acting for a user pick
//! the actor with `--as <email>`.

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use xchat_store::{GroupRole, GroupState, Recipient, Settings, UserStatus};

use crate::config::ChatConfig;
use crate::ctx::Ctx;
use crate::error::{Error, Result};
use crate::services::{GroupUpdate, ProfileUpdate, Upload};
use crate::AppState;

#[derive(Parser, Debug)]
#[command(name = "xchat")]
#[command(about = "xchat: users, contacts, groups and messages in one XML file", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Data directory; overrides XCHAT_ROOT and the saved root
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,
    /// Act as the user registered under this email
    #[arg(long = "as", global = true, value_name = "EMAIL")]
    pub actor: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory and an empty data file
    Init,
    /// Validate the data file and print record counts
    Check,
    /// Remember a data directory for later runs
    SetRoot { path: PathBuf },
    /// Manage accounts
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Manage the actor's contacts
    Contact {
        #[command(subcommand)]
        action: ContactAction,
    },
    /// Manage groups
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// Send a text message
    Send {
        #[command(flatten)]
        target: Target,
        text: String,
    },
    /// Send a file
    SendFile {
        #[command(flatten)]
        target: Target,
        path: PathBuf,
        #[arg(short, long)]
        caption: Option<String>,
        /// Content type; guessed from the extension when omitted
        #[arg(short, long)]
        mime: Option<String>,
    },
    /// Show a conversation or group history
    History {
        #[command(flatten)]
        target: Target,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Mark messages from a contact as read
    Read { email: String },
    /// Latest conversations with unread counts
    Inbox,
    /// Search messages visible to the actor
    Search { query: String },
    /// Save a message's attachment to disk
    Download {
        id: String,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Delete a message the actor sent
    DeleteMessage { id: String },
}

#[derive(Subcommand, Debug)]
pub enum UserAction {
    Register { name: String, email: String },
    /// Show a user; the actor when no email is given
    Show { email: Option<String> },
    List,
    Search { query: String },
    Update {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    Status { status: UserStatus },
    Settings,
    Set { key: String, value: String },
    Delete,
}

#[derive(Subcommand, Debug)]
pub enum ContactAction {
    Add {
        email: String,
        #[arg(short, long)]
        name: Option<String>,
    },
    Remove { email: String },
    Rename { email: String, name: String },
    List,
}

#[derive(Subcommand, Debug)]
pub enum GroupAction {
    Create {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
        /// Email of an initial member; repeatable
        #[arg(short, long = "member")]
        members: Vec<String>,
    },
    Show { id: String },
    List,
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Add { id: String, email: String },
    Remove { id: String, email: String },
    Role { id: String, email: String, role: GroupRole },
    Leave { id: String },
    Delete { id: String },
}

/// Direct peer or group a command is about.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct Target {
    /// Email of the other user
    #[arg(long)]
    pub to: Option<String>,
    /// Group id
    #[arg(long)]
    pub group: Option<String>,
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Internal(e.to_string()))
}

fn group_state_json(state: &GroupState) -> Value {
    match state {
        GroupState::Active(group) => json!({ "dissolved": false, "group": group }),
        GroupState::Dissolved(messages) => {
            json!({ "dissolved": true, "messages_removed": messages.len() })
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

fn config_for(root: Option<PathBuf>) -> Result<ChatConfig> {
    Ok(match root {
        Some(root) => ChatConfig::with_base_dir(root),
        None => ChatConfig::from_env()?,
    })
}

struct Session {
    state: AppState,
    actor_email: Option<String>,
}

impl Session {
    async fn user_id(&self, email: &str) -> Result<String> {
        self.state
            .users
            .find_by_email(email)
            .await?
            .map(|u| u.id)
            .ok_or_else(|| Error::not_found("user", email.trim()))
    }

    async fn ctx(&self) -> Result<Ctx> {
        let email = self
            .actor_email
            .as_deref()
            .ok_or_else(|| Error::Validation("this command needs --as <email>".into()))?;
        Ok(Ctx::new(self.user_id(email).await?))
    }

    async fn recipient(&self, target: &Target) -> Result<Recipient> {
        match (&target.to, &target.group) {
            (Some(email), None) => Ok(Recipient::User(self.user_id(email).await?)),
            (None, Some(group)) => Ok(Recipient::Group(group.clone())),
            _ => Err(Error::Validation("give exactly one of --to or --group".into())),
        }
    }
}

/// Run one command and return its JSON output.
pub async fn run(cli: Cli) -> Result<Value> {
    let Cli {
        root,
        actor,
        command,
    } = cli;

    if let Commands::SetRoot { path } = command {
        xchat_common::save_persistent_root(path.clone())?;
        return Ok(json!({ "root": path.display().to_string() }));
    }

    let state = AppState::init(config_for(root)?).await?;
    let session = Session {
        state,
        actor_email: actor,
    };
    let state = &session.state;

    match command {
        Commands::Init | Commands::Check | Commands::SetRoot { .. } => Ok(json!({
            "data_file": state.config.data_file.display().to_string(),
            "uploads_dir": state.config.uploads_dir.display().to_string(),
            "valid": true,
            "stats": to_json(&state.xml.stats().await?)?,
        })),
        Commands::User { action } => run_user(&session, action).await,
        Commands::Contact { action } => run_contact(&session, action).await,
        Commands::Group { action } => run_group(&session, action).await,
        Commands::Send { target, text } => {
            let ctx = session.ctx().await?;
            let recipient = session.recipient(&target).await?;
            to_json(&state.messages.send_text(&ctx, recipient, &text).await?)
        }
        Commands::SendFile {
            target,
            path,
            caption,
            mime,
        } => {
            let ctx = session.ctx().await?;
            let recipient = session.recipient(&target).await?;
            let bytes = tokio::fs::read(&path).await?;
            let mut upload = Upload::new(file_name_of(&path), bytes);
            if let Some(mime) = mime {
                upload = upload.with_mime_type(mime);
            }
            let message = state
                .messages
                .send_file(&ctx, recipient, &upload, caption.as_deref())
                .await?;
            to_json(&message)
        }
        Commands::History { target, limit } => {
            let ctx = session.ctx().await?;
            let messages = match session.recipient(&target).await? {
                Recipient::User(peer) => state.messages.conversation(&ctx, &peer, limit).await?,
                Recipient::Group(group) => {
                    state.messages.group_history(&ctx, &group, limit).await?
                }
            };
            to_json(&messages)
        }
        Commands::Read { email } => {
            let ctx = session.ctx().await?;
            let peer = session.user_id(&email).await?;
            let marked = state.messages.mark_read(&ctx, &peer).await?;
            Ok(json!({ "marked_read": marked }))
        }
        Commands::Inbox => {
            let ctx = session.ctx().await?;
            Ok(json!({
                "conversations": to_json(&state.messages.recent_conversations(&ctx).await?)?,
                "unread": to_json(&state.messages.unread_counts(&ctx).await?)?,
            }))
        }
        Commands::Search { query } => {
            let ctx = session.ctx().await?;
            to_json(&state.messages.search(&ctx, &query).await?)
        }
        Commands::Download { id, out } => {
            let ctx = session.ctx().await?;
            let (attachment, bytes) = state.messages.download(&ctx, &id).await?;
            let out = out.unwrap_or_else(|| PathBuf::from(&attachment.name));
            tokio::fs::write(&out, &bytes).await?;
            Ok(json!({
                "saved": out.display().to_string(),
                "attachment": to_json(&attachment)?,
            }))
        }
        Commands::DeleteMessage { id } => {
            let ctx = session.ctx().await?;
            to_json(&state.messages.delete_message(&ctx, &id).await?)
        }
    }
}

async fn run_user(session: &Session, action: UserAction) -> Result<Value> {
    let users = &session.state.users;
    match action {
        UserAction::Register { name, email } => to_json(&users.register(&name, &email).await?),
        UserAction::Show { email: Some(email) } => {
            to_json(&users.get(&session.user_id(&email).await?).await?)
        }
        UserAction::Show { email: None } => {
            let ctx = session.ctx().await?;
            to_json(&users.get(ctx.user_id()).await?)
        }
        UserAction::List => to_json(&users.list().await?),
        UserAction::Search { query } => {
            to_json(&users.search(&session.ctx().await?, &query).await?)
        }
        UserAction::Update { name, email } => {
            let update = ProfileUpdate { name, email };
            to_json(&users.update_profile(&session.ctx().await?, update).await?)
        }
        UserAction::Status { status } => {
            to_json(&users.set_status(&session.ctx().await?, status).await?)
        }
        UserAction::Settings => to_json(&users.settings(&session.ctx().await?).await?),
        UserAction::Set { key, value } => {
            let changes = Settings::from([(key, value)]);
            to_json(&users.update_settings(&session.ctx().await?, changes).await?)
        }
        UserAction::Delete => to_json(&users.delete_account(&session.ctx().await?).await?),
    }
}

async fn run_contact(session: &Session, action: ContactAction) -> Result<Value> {
    let users = &session.state.users;
    let ctx = session.ctx().await?;
    match action {
        ContactAction::Add { email, name } => {
            to_json(&users.add_contact(&ctx, &email, name.as_deref()).await?)
        }
        ContactAction::Remove { email } => {
            let other = session.user_id(&email).await?;
            users.remove_contact(&ctx, &other).await?;
            Ok(json!({ "removed": other }))
        }
        ContactAction::Rename { email, name } => {
            let other = session.user_id(&email).await?;
            to_json(&users.rename_contact(&ctx, &other, &name).await?)
        }
        ContactAction::List => {
            let contacts: Vec<Value> = users
                .list_contacts(&ctx)
                .await?
                .into_iter()
                .map(|(contact, user)| json!({ "contact": contact, "user": user }))
                .collect();
            Ok(Value::Array(contacts))
        }
    }
}

async fn run_group(session: &Session, action: GroupAction) -> Result<Value> {
    let groups = &session.state.groups;
    let ctx = session.ctx().await?;
    match action {
        GroupAction::Create {
            name,
            description,
            members,
        } => {
            let mut member_ids = Vec::with_capacity(members.len());
            for email in &members {
                member_ids.push(session.user_id(email).await?);
            }
            let group = groups
                .create_group(&ctx, &name, description.as_deref(), &member_ids)
                .await?;
            to_json(&group)
        }
        GroupAction::Show { id } => to_json(&groups.get_group(&ctx, &id).await?),
        GroupAction::List => to_json(&groups.list_groups(&ctx).await?),
        GroupAction::Update {
            id,
            name,
            description,
        } => {
            let update = GroupUpdate { name, description };
            to_json(&groups.update_group(&ctx, &id, update).await?)
        }
        GroupAction::Add { id, email } => {
            let user_id = session.user_id(&email).await?;
            to_json(&groups.add_member(&ctx, &id, &user_id).await?)
        }
        GroupAction::Remove { id, email } => {
            let user_id = session.user_id(&email).await?;
            Ok(group_state_json(
                &groups.remove_member(&ctx, &id, &user_id).await?,
            ))
        }
        GroupAction::Role { id, email, role } => {
            let user_id = session.user_id(&email).await?;
            to_json(&groups.set_role(&ctx, &id, &user_id, role).await?)
        }
        GroupAction::Leave { id } => Ok(group_state_json(&groups.leave_group(&ctx, &id).await?)),
        GroupAction::Delete { id } => to_json(&groups.delete_group(&ctx, &id).await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_target_requires_exactly_one() {
        assert!(Cli::try_parse_from(["xchat", "--as", "a@x.io", "send", "hi"]).is_err());
        assert!(Cli::try_parse_from([
            "xchat", "send", "--to", "b@x.io", "--group", "grp_1", "hi"
        ])
        .is_err());

        let cli = Cli::try_parse_from(["xchat", "send", "--group", "grp_1", "hi", "--as", "a@x.io"])
            .unwrap();
        assert_eq!(cli.actor.as_deref(), Some("a@x.io"));
        match cli.command {
            Commands::Send { target, text } => {
                assert_eq!(target.group.as_deref(), Some("grp_1"));
                assert_eq!(text, "hi");
            }
            other => panic!("parsed {:?}", other),
        }
    }

    #[test]
    fn test_enum_arguments_parse() {
        let cli = Cli::try_parse_from(["xchat", "user", "status", "busy"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::User {
                action: UserAction::Status {
                    status: UserStatus::Busy
                }
            }
        ));
        assert!(Cli::try_parse_from(["xchat", "user", "status", "asleep"]).is_err());
        assert!(Cli::try_parse_from(["xchat", "group", "role", "grp_1", "b@x.io", "admin"]).is_ok());
    }
}
