//! # Ringflow: Outbound Call Campaigns
//!
//! Creates campaigns over a contact list and dispatches voice calls
//! immediately, at a scheduled time, or staggered by a fixed interval.
//!
//! Usage:
//!   ringflow campaign create --name "Ward 12" --contacts c1,c2,c3
//!   ringflow campaign start <campaign-id>
//!   ringflow dispatch <campaign-id> --contacts c1,c2 --policy staggered --interval 5
//!   ringflow history --campaign <campaign-id>
//!   ringflow stats

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ringflow_channels::{DryRunInvoker, TwilioInvoker};
use ringflow_core::{CallInvoker, CredentialBundle, CredentialProvider, RingflowConfig};
use ringflow_scheduler::{
    Attempt, Campaign, ContactStore, DispatchDb, DispatchEngine, DispatchParams, DispatchPolicy,
    spawn_snapshot_writer,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ringflow",
    version,
    about = "📞 Ringflow: outbound voice call campaigns"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.ringflow/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Log calls instead of placing them
    #[arg(long)]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Campaign management
    Campaign(CampaignCommands),
    /// Dispatch calls to selected contacts of a campaign
    Dispatch(DispatchArgs),
    /// Show recorded call attempts, newest first
    History {
        /// Only this campaign
        #[arg(long)]
        campaign: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Attempt and campaign counters
    Stats,
}

#[derive(Args)]
struct CampaignCommands {
    #[command(subcommand)]
    action: CampaignActions,
}

#[derive(Subcommand)]
enum CampaignActions {
    /// Create an active campaign
    Create {
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Contact ids, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        contacts: Vec<String>,
    },
    List,
    Activate { id: String },
    Pause { id: String },
    /// Flip between active and paused
    Toggle { id: String },
    Complete { id: String },
    Delete { id: String },
    /// Call every contact of the campaign now
    Start { id: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Immediate,
    Scheduled,
    Staggered,
}

#[derive(Args)]
struct DispatchArgs {
    campaign_id: String,
    /// Contact ids, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    contacts: Vec<String>,
    #[arg(long, value_enum, default_value = "immediate")]
    policy: PolicyArg,
    /// Start time, RFC 3339 (scheduled and staggered; default now)
    #[arg(long)]
    at: Option<String>,
    /// Minutes between calls (staggered, clamped to 1..=60)
    #[arg(long, default_value = "5")]
    interval: u32,
    /// Times the message is repeated within a call
    #[arg(long, default_value = "1")]
    repeat: u32,
    #[arg(short, long)]
    message: Option<String>,
}

impl DispatchArgs {
    fn params(&self) -> Result<DispatchParams> {
        let start = match &self.at {
            Some(at) => DateTime::parse_from_rfc3339(at)
                .with_context(|| format!("invalid --at time '{at}'"))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };
        let policy = match self.policy {
            PolicyArg::Immediate => DispatchPolicy::Immediate,
            PolicyArg::Scheduled => DispatchPolicy::ScheduledForLater { start },
            PolicyArg::Staggered => DispatchPolicy::Staggered {
                start,
                interval_minutes: self.interval,
            },
        };
        let mut params = DispatchParams::new(policy).with_repeat_count(self.repeat);
        if let Some(message) = &self.message {
            params = params.with_message(message.as_str());
        }
        Ok(params)
    }
}

/// Dry runs fall back to placeholder credentials so nothing needs configuring.
struct DryRunCredentials(CredentialBundle);

impl CredentialProvider for DryRunCredentials {
    fn credential_bundle(&self) -> ringflow_core::Result<CredentialBundle> {
        Ok(self.0.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "ringflow=debug,ringflow_scheduler=debug,ringflow_channels=debug"
    } else {
        "ringflow=info,ringflow_scheduler=info,ringflow_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => RingflowConfig::load_from(&PathBuf::from(shellexpand::tilde(path).to_string()))?,
        None => RingflowConfig::load()?,
    };

    let db = DispatchDb::open(&config.storage.db_path())?;
    let campaigns = db.load_campaigns()?;
    let attempts = db.load_attempts()?;
    let db = Arc::new(Mutex::new(db));

    let directory = ContactStore::new(&config.storage.contacts_path()).directory();
    tracing::debug!("📇 {} contact(s) loaded", directory.len());

    let (invoker, credentials): (Arc<dyn CallInvoker>, Arc<dyn CredentialProvider>) = if cli.dry_run {
        let bundle = config.twilio.bundle();
        let bundle = if bundle.is_complete() {
            bundle
        } else {
            CredentialBundle::new("dry-run", "dry-run", "+10000000000")
        };
        (Arc::new(DryRunInvoker::new()), Arc::new(DryRunCredentials(bundle)))
    } else {
        (
            Arc::new(TwilioInvoker::new(&config.twilio.api_base)),
            Arc::new(config.twilio.clone()),
        )
    };

    let engine = DispatchEngine::new(config.dispatch.clone(), Arc::new(directory), credentials, invoker);
    if !cli.command.places_calls() {
        // Another process may own the unfinished attempts; leave them be.
        engine.load(campaigns, attempts).await;
        return run(cli.command, &engine, &db).await;
    }

    let interrupted = engine.restore(campaigns, attempts).await;
    if interrupted > 0 {
        save_all_attempts(&engine, &db).await;
    }
    let worker = engine.start().await?;
    let writer = spawn_snapshot_writer(engine.clone(), Arc::clone(&db));

    let outcome = run(cli.command, &engine, &db).await;

    engine.shutdown();
    worker.await.ok();
    writer.abort();
    save_all_attempts(&engine, &db).await;
    outcome
}

impl Commands {
    /// Commands that run the dispatch worker and own unfinished attempts.
    fn places_calls(&self) -> bool {
        match self {
            Commands::Dispatch(_) => true,
            Commands::Campaign(cmd) => matches!(cmd.action, CampaignActions::Start { .. }),
            Commands::History { .. } | Commands::Stats => false,
        }
    }
}

async fn run(command: Commands, engine: &DispatchEngine, db: &Arc<Mutex<DispatchDb>>) -> Result<()> {
    match command {
        Commands::Campaign(cmd) => match cmd.action {
            CampaignActions::Create { name, description, contacts } => {
                let campaign = engine.create_campaign(&name, &description, &contacts).await?;
                save_campaign(db, &campaign)?;
                println!("✅ Campaign created: {} ({})", campaign.name, campaign.id);
                println!("   Contacts: {}", campaign.contact_ids.len());
            }
            CampaignActions::List => {
                let campaigns = engine.campaigns().await;
                if campaigns.is_empty() {
                    println!("No campaigns yet.");
                }
                for c in campaigns {
                    println!(
                        "{:<42} {:<10} {:>4} contacts  {}",
                        c.id,
                        c.status.label(),
                        c.contact_ids.len(),
                        c.name
                    );
                }
            }
            CampaignActions::Activate { id } => {
                let campaign = engine.activate_campaign(&id).await?;
                save_campaign(db, &campaign)?;
                println!("▶️  {} is active", campaign.name);
            }
            CampaignActions::Pause { id } => {
                let campaign = engine.pause_campaign(&id).await?;
                save_campaign(db, &campaign)?;
                println!("⏸️  {} is paused", campaign.name);
            }
            CampaignActions::Toggle { id } => {
                let campaign = engine.toggle_campaign(&id).await?;
                save_campaign(db, &campaign)?;
                println!("🔁 {} is {}", campaign.name, campaign.status);
            }
            CampaignActions::Complete { id } => {
                let campaign = engine.complete_campaign(&id).await?;
                save_campaign(db, &campaign)?;
                println!("🏁 {} is completed", campaign.name);
            }
            CampaignActions::Delete { id } => {
                let campaign = engine.delete_campaign(&id).await?;
                lock(db).delete_campaign(&campaign.id)?;
                println!("🗑️  {} deleted", campaign.name);
            }
            CampaignActions::Start { id } => {
                let attempts = engine.start_campaign(&id).await?;
                follow(engine, db, &id, attempts).await?;
            }
        },
        Commands::Dispatch(args) => {
            let params = args.params()?;
            let attempts = engine
                .submit_campaign_dispatch(&args.campaign_id, &args.contacts, params)
                .await?;
            follow(engine, db, &args.campaign_id, attempts).await?;
        }
        Commands::History { campaign, limit } => {
            let mut attempts = match &campaign {
                Some(id) => engine.attempts_for(id).await,
                None => engine.attempts().await,
            };
            attempts.sort_by(|a, b| b.scheduled_time.cmp(&a.scheduled_time));
            if attempts.is_empty() {
                println!("No call attempts recorded.");
            }
            for a in attempts.iter().take(limit) {
                print_attempt(a);
            }
        }
        Commands::Stats => {
            let stats = engine.stats().await;
            println!("📊 Ringflow stats");
            println!("   Campaigns:    {} ({} active)", stats.total_campaigns, stats.active_campaigns);
            println!("   Attempts:     {}", stats.total_attempts);
            println!("   Pending:      {}", stats.pending);
            println!("   Calling:      {}", stats.calling);
            println!("   Completed:    {}", stats.completed);
            println!("   Failed:       {}", stats.failed);
            println!("   Success rate: {}%", stats.success_rate);
        }
    }
    Ok(())
}

/// Persist a fresh batch, then wait for it to settle. Ctrl-C cancels what has not started.
async fn follow(
    engine: &DispatchEngine,
    db: &Arc<Mutex<DispatchDb>>,
    campaign_id: &str,
    attempts: Vec<Attempt>,
) -> Result<()> {
    lock(db).save_attempts(&attempts)?;
    let ids: Vec<String> = attempts.iter().map(|a| a.id.clone()).collect();
    println!("🗓️  {} call(s) scheduled", ids.len());
    for a in &attempts {
        print_attempt(a);
    }

    tokio::select! {
        _ = engine.wait_settled(&ids) => {}
        _ = tokio::signal::ctrl_c() => {
            let cancelled = engine.cancel_pending(campaign_id).await;
            println!("\n🛑 Cancelled {cancelled} pending call(s), waiting for calls in progress...");
            engine.wait_settled(&ids).await;
        }
    }

    println!("\nResults:");
    for id in &ids {
        if let Some(a) = engine.attempt(id).await {
            print_attempt(&a);
        }
    }
    Ok(())
}

fn print_attempt(a: &Attempt) {
    let reason = a
        .status
        .failure_reason()
        .map(|r| format!(" ({r})"))
        .unwrap_or_default();
    println!(
        "   #{:<3} {:<12} {} {}{}",
        a.ordinal_index,
        a.contact_id,
        a.scheduled_time.format("%Y-%m-%d %H:%M:%S"),
        a.status.label(),
        reason
    );
}

fn lock(db: &Mutex<DispatchDb>) -> std::sync::MutexGuard<'_, DispatchDb> {
    db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn save_campaign(db: &Mutex<DispatchDb>, campaign: &Campaign) -> Result<()> {
    lock(db).save_campaign(campaign)?;
    Ok(())
}

async fn save_all_attempts(engine: &DispatchEngine, db: &Mutex<DispatchDb>) {
    let attempts = engine.attempts().await;
    if let Err(e) = lock(db).save_attempts(&attempts) {
        tracing::warn!("⚠️ Failed to save attempts: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(args: &[&str]) -> Commands {
        let mut argv = vec!["ringflow"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv).command
    }

    #[test]
    fn test_only_dispatching_commands_place_calls() {
        assert!(command(&["dispatch", "camp-1", "--contacts", "c1,c2"]).places_calls());
        assert!(command(&["campaign", "start", "camp-1"]).places_calls());

        assert!(!command(&["history"]).places_calls());
        assert!(!command(&["stats"]).places_calls());
        assert!(!command(&["campaign", "list"]).places_calls());
        assert!(!command(&["campaign", "pause", "camp-1"]).places_calls());
    }
}
