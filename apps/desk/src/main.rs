use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use client_core::{ClientEvent, WorkbenchClient};
use shared::domain::{ChatBoxId, CompanyRequestId, FileId, NotificationId, RequestId};
use workflow::RevisionAction;

mod config;
mod session;

use config::load_settings;
use session::FileSessionStore;

#[derive(Parser, Debug)]
#[command(name = "desk", about = "Revision workbench CLI")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and persist the session locally.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Drop the persisted session.
    Logout,
    /// List revision requests for a company request.
    Revisions {
        #[arg(long)]
        company_request: String,
    },
    /// Apply a workflow transition to a revision request.
    Action {
        #[arg(long)]
        company_request: String,
        #[arg(long)]
        request: String,
        #[command(subcommand)]
        action: ActionCommand,
    },
    /// Delete a revision request (admin only).
    Delete {
        #[arg(long)]
        company_request: String,
        #[arg(long)]
        request: String,
    },
    /// Print chat history and tail new messages for a request.
    Chat {
        #[arg(long)]
        request: String,
    },
    /// List notifications; optionally mark one read.
    Notifications {
        #[arg(long)]
        mark_read: Option<String>,
    },
    /// Print the wallet balance.
    Wallet,
    /// Subscribe to all relevant topics and print events as they arrive.
    Watch {
        #[arg(long)]
        company_request: String,
    },
}

#[derive(Subcommand, Debug)]
enum ActionCommand {
    /// Propose a point price (designer, priced revision types).
    Propose {
        #[arg(long)]
        amount: i64,
    },
    /// Start work on a bug fix without pricing (designer).
    StartBugFix,
    /// Approve the proposed price (company; checks the wallet first).
    ApprovePrice,
    /// Reject the request with a reason (company).
    Reject {
        #[arg(long)]
        reason: String,
    },
    /// Deliver the finished model by stored file reference (designer).
    Deliver {
        #[arg(long)]
        file_id: String,
    },
    /// Approve the delivered model into the library (company).
    ApproveModel {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: String,
    },
    /// Reject the delivered model with a reason (company).
    RejectModel {
        #[arg(long)]
        reason: String,
    },
    /// Re-enter processing after a rejected bug-fix delivery (designer).
    Redeliver,
}

impl From<ActionCommand> for RevisionAction {
    fn from(command: ActionCommand) -> Self {
        match command {
            ActionCommand::Propose { amount } => RevisionAction::ProposePrice { amount },
            ActionCommand::StartBugFix => RevisionAction::StartBugFix,
            ActionCommand::ApprovePrice => RevisionAction::ApprovePrice,
            ActionCommand::Reject { reason } => RevisionAction::RejectRequest { reason },
            ActionCommand::Deliver { file_id } => RevisionAction::DeliverModel {
                model_file: FileId::new(file_id),
            },
            ActionCommand::ApproveModel { name, description } => {
                RevisionAction::ApproveModel { name, description }
            }
            ActionCommand::RejectModel { reason } => RevisionAction::RejectModel { reason },
            ActionCommand::Redeliver => RevisionAction::Redeliver,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    let settings = load_settings();

    let sessions = Arc::new(FileSessionStore::new(settings.session_file.clone()));
    let client = WorkbenchClient::new(sessions)?;

    match args.command {
        Command::Login { email, password } => {
            client
                .sign_in(&settings.api_base_url, &email, &password)
                .await?;
            println!("signed in as {email} ({:?})", client.current_role().await?);
        }
        Command::Logout => {
            client.sign_out().await;
            println!("signed out");
        }
        Command::Revisions { company_request } => {
            client.restore_session(&settings.api_base_url).await?;
            let revisions = client
                .refresh_revisions(&CompanyRequestId::new(company_request))
                .await?;
            for revision in revisions {
                println!(
                    "{}  {:?}  {:?}  price={:?}  {}",
                    revision.id,
                    revision.status,
                    revision.revision_type,
                    revision.price_proposal,
                    revision.reason
                );
            }
        }
        Command::Action {
            company_request,
            request,
            action,
        } => {
            client.restore_session(&settings.api_base_url).await?;
            // The price-approval guard reads the wallet; make sure it is
            // fresh before planning the transition.
            if matches!(action, ActionCommand::ApprovePrice) {
                client.refresh_wallet().await?;
            }
            let revisions = client
                .refresh_revisions(&CompanyRequestId::new(company_request))
                .await?;
            let record = revisions
                .into_iter()
                .find(|r| r.id == RequestId::new(request.clone()))
                .ok_or_else(|| anyhow!("revision request {request} not found"))?;
            let updated = client.apply_action(&record, action.into()).await?;
            for revision in updated {
                println!("{}  {:?}", revision.id, revision.status);
            }
        }
        Command::Delete {
            company_request,
            request,
        } => {
            client.restore_session(&settings.api_base_url).await?;
            client
                .delete_revision(
                    &RequestId::new(request),
                    &CompanyRequestId::new(company_request),
                )
                .await?;
            println!("deleted");
        }
        Command::Chat { request } => {
            client.restore_session(&settings.api_base_url).await?;
            client.connect_realtime(&settings.realtime_url()).await?;
            let chat_box = ChatBoxId::new(request);
            for message in client.open_chat(&chat_box).await? {
                println!("[{}] {}: {}", message.timestamp, message.sender_email, message.content);
            }
            client.watch_chat(&chat_box).await?;
            print_events(&client).await;
        }
        Command::Notifications { mark_read } => {
            client.restore_session(&settings.api_base_url).await?;
            let notifications = client.refresh_notifications().await?;
            for notification in &notifications {
                println!(
                    "{}  {:?}  {:?}  {}",
                    notification.id, notification.kind, notification.status, notification.title
                );
            }
            if let Some(id) = mark_read {
                client
                    .mark_notification_read(&NotificationId::new(id))
                    .await?;
                println!("marked read");
            }
        }
        Command::Wallet => {
            client.restore_session(&settings.api_base_url).await?;
            println!("balance: {}", client.refresh_wallet().await?);
        }
        Command::Watch { company_request } => {
            client.restore_session(&settings.api_base_url).await?;
            client.connect_realtime(&settings.realtime_url()).await?;
            client.refresh_notifications().await?;
            client.refresh_wallet().await?;
            client
                .refresh_revisions(&CompanyRequestId::new(company_request))
                .await?;
            print_events(&client).await;
        }
    }

    Ok(())
}

async fn print_events(client: &Arc<WorkbenchClient>) {
    let mut events = client.subscribe_events();
    while let Ok(event) = events.recv().await {
        match event {
            ClientEvent::RevisionsRefreshed {
                company_request_id,
                revisions,
            } => {
                println!("revisions for {company_request_id}:");
                for revision in revisions {
                    println!("  {}  {:?}", revision.id, revision.status);
                }
            }
            ClientEvent::ChatMessageReceived { message } => {
                println!("[{}] {}: {}", message.timestamp, message.sender_email, message.content);
            }
            ClientEvent::NotificationsRefreshed { notifications } => {
                let unread = notifications
                    .iter()
                    .filter(|n| n.status == shared::domain::NotificationStatus::Unread)
                    .count();
                println!("notifications refreshed ({unread} unread)");
            }
            ClientEvent::WalletRefreshed { balance } => {
                println!("wallet balance: {balance}");
            }
            ClientEvent::ChannelLost => {
                eprintln!("realtime channel lost; restart to resubscribe");
                break;
            }
            ClientEvent::SessionExpired => {
                eprintln!("session expired; sign in again");
                break;
            }
            ClientEvent::Error(message) => {
                eprintln!("error: {message}");
            }
        }
    }
}
