mod file_store;
mod render;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use forge_core::assembler::ClarificationChoice;
use forge_core::config::ForgeConfig;
use forge_core::food_db::{create_food_database, FoodDatabase};
use forge_core::llm::create_provider;
use forge_core::normalizer::UnitNormalizer;
use forge_core::orchestrator::Ingestor;
use forge_core::resolver::FoodResolver;
use forge_core::store::LogStore;
use forge_core::summary::{daily_summary, day_bounds, local_today, weekly_summary};
use forge_core::triggers::looks_like_log;
use forge_core::types::RawMessage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::file_store::FileLogStore;

#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Log food, water and body weight from plain sentences", long_about = None)]
struct Cli {
    /// Whose log to use
    #[arg(long, global = true, default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log one message, e.g. "I just had 24oz water and an apple"
    Log {
        /// The message text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Read messages from stdin, logging the ones that look like food logs.
    /// "/today", "/week", "/undo" and "/pending" work as commands.
    Chat,
    /// Answer a pending clarification
    Clarify {
        /// Clarification id, as printed when it was created
        id: Uuid,
        /// Candidate number (1-based)
        #[arg(long)]
        choice: Option<usize>,
        /// Amount, when the original one could not be understood
        #[arg(long, requires = "unit")]
        amount: Option<String>,
        /// Unit for --amount (g, ml, oz, cups, items, ...)
        #[arg(long, requires = "amount")]
        unit: Option<String>,
    },
    /// List pending clarifications
    Pending,
    /// Show a day's totals (default: today in the configured time zone)
    Today {
        /// Day to summarize (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show the seven days ending on a date (default: today)
    Week {
        /// Last day of the week (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Delete today's most recent entry
    Undo,
    /// Look up foods matching a description
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Drop expired clarifications
    Purge,
}

struct App {
    config: ForgeConfig,
    ingestor: Ingestor,
    food_db: Arc<dyn FoodDatabase>,
    store: Arc<FileLogStore>,
    user: String,
}

impl App {
    async fn new(user: String) -> Result<Self> {
        let config = ForgeConfig::from_env().context("Invalid configuration")?;
        let provider = create_provider(&config.llm).context("Failed to set up the LLM provider")?;
        let food_db =
            create_food_database(&config.food_db).context("Failed to set up the food database")?;
        let store = Arc::new(
            FileLogStore::open(&config.data_dir)
                .await
                .with_context(|| format!("Failed to open log in {}", config.data_dir.display()))?,
        );
        tracing::debug!(
            provider = provider.provider_name(),
            model = provider.model_name(),
            food_db = food_db.source_name(),
            store = %store.path().display(),
            "Forge ready"
        );

        let ingestor = Ingestor::new(
            &config,
            provider,
            Arc::clone(&food_db),
            Arc::clone(&store) as Arc<dyn LogStore>,
        );
        Ok(Self {
            config,
            ingestor,
            food_db,
            store,
            user,
        })
    }

    async fn log(&self, text: &str) -> Result<String> {
        let message = RawMessage::new(&self.user, text);
        let result = self
            .ingestor
            .ingest(&message)
            .await
            .context("Failed to log message")?;
        Ok(render::ingestion_reply(&result, self.config.ingest.weight_unit))
    }

    async fn clarify(
        &self,
        id: Uuid,
        choice: Option<usize>,
        amount: Option<String>,
        unit: Option<String>,
    ) -> Result<String> {
        let candidate = match choice {
            Some(0) => bail!("Choices start at 1"),
            Some(n) => Some(n - 1),
            None => None,
        };

        let quantity = match (amount, unit) {
            (Some(amount), Some(unit)) => {
                let request = self
                    .store
                    .clarification(&self.user, id)
                    .await?
                    .with_context(|| format!("No pending clarification {id}"))?;
                let normalizer = UnitNormalizer::new(self.config.ingest.weight_unit);
                let quantity = normalizer
                    .normalize(Some(&amount), Some(&unit), request.item.kind)
                    .with_context(|| format!("Could not use \"{amount} {unit}\""))?;
                Some(quantity)
            }
            _ => None,
        };

        let entry = self
            .ingestor
            .clarify(&self.user, id, ClarificationChoice { candidate, quantity })
            .await?;
        Ok(format!(
            "Logged: {}",
            render::entry_line(&entry, self.config.ingest.weight_unit)
        ))
    }

    async fn pending(&self) -> Result<String> {
        let pending = self
            .store
            .pending_clarifications(&self.user, Utc::now())
            .await?;
        if pending.is_empty() {
            return Ok("No pending clarifications.".to_string());
        }
        Ok(pending
            .iter()
            .map(render::clarification_prompt)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn today(&self, date: Option<NaiveDate>) -> Result<String> {
        let tz = self.config.timezone;
        let date = date.unwrap_or_else(|| local_today(tz, Utc::now()));
        let summary = daily_summary(self.store.as_ref(), &self.user, date, tz).await?;
        Ok(render::summary_reply(&summary, self.config.ingest.weight_unit))
    }

    async fn week(&self, date: Option<NaiveDate>) -> Result<String> {
        let tz = self.config.timezone;
        let end = date.unwrap_or_else(|| local_today(tz, Utc::now()));
        let days = weekly_summary(self.store.as_ref(), &self.user, end, tz).await?;
        Ok(render::week_reply(&days))
    }

    async fn undo(&self) -> Result<String> {
        let tz = self.config.timezone;
        let (start, end) = day_bounds(local_today(tz, Utc::now()), tz);
        let entries = self.store.entries_between(&self.user, start, end).await?;
        let Some(last) = entries.last() else {
            return Ok("No logs to undo today.".to_string());
        };

        match self.store.delete_entry(&self.user, last.id).await? {
            Some(deleted) => Ok(render::deleted_reply(
                &deleted,
                self.config.ingest.weight_unit,
            )),
            None => Ok("No logs to undo today.".to_string()),
        }
    }

    async fn search(&self, query: &str) -> Result<String> {
        let resolver = FoodResolver::new(
            Arc::clone(&self.food_db),
            self.config.food_db.page_size,
            self.config.ingest.min_similarity,
            self.config.ingest.call_timeout,
        );
        let candidates = resolver.resolve(query).await;
        if candidates.is_empty() {
            return Ok(format!("No foods match \"{query}\"."));
        }
        Ok(candidates
            .iter()
            .map(|c| {
                format!(
                    "{:>8}  {:.3}  {} ({} kcal/100g)",
                    c.fdc_id, c.confidence, c.name, c.per_100g.calories
                )
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn purge(&self) -> Result<String> {
        let purged = self.ingestor.purge_expired(Utc::now()).await?;
        Ok(format!("Purged {purged} expired clarification(s)."))
    }

    /// Line-oriented chat loop over stdin.
    async fn chat(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            let reply = match line {
                "" => continue,
                "/today" => self.today(None).await,
                "/week" => self.week(None).await,
                "/undo" => self.undo().await,
                "/pending" => self.pending().await,
                text if looks_like_log(text) => self.log(text).await,
                _ => {
                    tracing::debug!(line, "Not a log message, ignoring");
                    continue;
                }
            };
            // Keep chatting after a failed message
            match reply {
                Ok(reply) => println!("{reply}"),
                Err(e) => eprintln!("Error: {e:#}"),
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::new(cli.user).await?;

    let reply = match cli.command {
        Commands::Log { text } => app.log(&text.join(" ")).await?,
        Commands::Chat => {
            app.chat().await?;
            return Ok(());
        }
        Commands::Clarify {
            id,
            choice,
            amount,
            unit,
        } => app.clarify(id, choice, amount, unit).await?,
        Commands::Pending => app.pending().await?,
        Commands::Today { date } => app.today(date).await?,
        Commands::Week { date } => app.week(date).await?,
        Commands::Undo => app.undo().await?,
        Commands::Search { query } => app.search(&query.join(" ")).await?,
        Commands::Purge => app.purge().await?,
    };
    println!("{reply}");

    Ok(())
}
