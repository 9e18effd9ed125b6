//! Subcommands.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use combot_core::{
    CatalogStore, Config, EventHandle, ImportReport, PageCache, Player, PlaylistFetcher,
    RateLimiter, Resource, SanitizedConfig, SyncOrchestrator, YoutubeClient,
};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import a playlist into a category / starter.
    Import {
        category: String,
        starter: String,
        /// Playlist URL or id.
        playlist: String,
    },
    /// List categories with their starters and combo counts.
    Categories,
    /// List the combos of one starter.
    Combos { category: String, starter: String },
    AddCategory { name: String },
    /// Remove a category and all of its combos.
    RemoveCategory { name: String },
    AddStarter { category: String, starter: String },
    /// Remove a starter and all of its combos.
    RemoveStarter { category: String, starter: String },
    AddPlayer {
        #[arg(long)]
        name: String,
        #[arg(long)]
        social_link: String,
        #[arg(long, default_value = "")]
        region: String,
        #[arg(long, default_value = "")]
        image_url: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    RemovePlayer { name: String },
    AddResource {
        #[arg(long)]
        name: String,
        #[arg(long = "type")]
        kind: String,
        #[arg(long)]
        link: String,
        #[arg(long)]
        credit: Option<String>,
    },
    /// Print the effective configuration with secrets redacted.
    ShowConfig,
}

pub async fn execute(
    command: Command,
    config: &Config,
    store: &CatalogStore,
    events: &EventHandle,
) -> Result<()> {
    match command {
        Command::Import {
            category,
            starter,
            playlist,
        } => {
            let orchestrator = build_orchestrator(config, store, events)?;
            let report = orchestrator
                .import_playlist(&category, &starter, &playlist)
                .await?;
            print_report(&report);
        }
        Command::Categories => {
            let catalog = store.read();
            if catalog.categories.is_empty() {
                println!("No categories yet.");
            }
            for category in &catalog.categories {
                println!("{}", category.name);
                for starter in &category.starters {
                    println!(
                        "  {} ({} combos)",
                        starter,
                        catalog.combo_count(&category.name, starter)
                    );
                }
            }
        }
        Command::Combos { category, starter } => {
            let catalog = store.read();
            if !catalog.has_starter(&category, &starter) {
                bail!("No starter {} in category {}", starter, category);
            }
            if let Some(note) = catalog.starter_note(&category, &starter) {
                println!("Note: {}", note);
            }
            for combo in catalog.combos_for(&category, &starter) {
                println!("{}  {}", combo.notation, combo.link());
                if let Some(notes) = &combo.notes {
                    println!("    {}", notes);
                }
            }
        }
        Command::AddCategory { name } => {
            store.mutate(|c| c.add_category(&name))?;
            println!("Added category {}", name.trim());
        }
        Command::RemoveCategory { name } => {
            let removed = store.mutate(|c| c.remove_category(&name))?;
            println!("Removed category {} ({} combos deleted)", name, removed);
        }
        Command::AddStarter { category, starter } => {
            store.mutate(|c| c.add_starter(&category, &starter))?;
            println!("Added starter {} to {}", starter.trim(), category);
        }
        Command::RemoveStarter { category, starter } => {
            let (listed, combos) = store.mutate(|c| Ok(c.remove_starter(&category, &starter)))?;
            if !listed && combos == 0 {
                bail!("No starter {} in category {}", starter, category);
            }
            println!(
                "Removed starter {} from {} ({} combos deleted)",
                starter, category, combos
            );
        }
        Command::AddPlayer {
            name,
            social_link,
            region,
            image_url,
            description,
        } => {
            store.mutate(|c| {
                c.add_player(Player {
                    name: name.clone(),
                    region,
                    social_link,
                    image_url,
                    description,
                })
            })?;
            println!("Added player {}", name);
        }
        Command::RemovePlayer { name } => {
            store.mutate(|c| c.remove_player(&name))?;
            println!("Removed player {}", name);
        }
        Command::AddResource {
            name,
            kind,
            link,
            credit,
        } => {
            store.mutate(|c| {
                c.add_resource(Resource {
                    name: name.clone(),
                    kind,
                    link,
                    credit,
                })
            })?;
            println!("Added resource {}", name);
        }
        Command::ShowConfig => {
            let sanitized = SanitizedConfig::from(config);
            println!("{}", serde_json::to_string_pretty(&sanitized)?);
        }
    }
    Ok(())
}

fn build_orchestrator(
    config: &Config,
    store: &CatalogStore,
    events: &EventHandle,
) -> Result<SyncOrchestrator> {
    let client = YoutubeClient::new(&config.youtube).context("Failed to create YouTube client")?;
    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    let cache = PageCache::new();
    let _sweeper = cache.spawn_sweeper(config.cache.sweep_interval());

    let fetcher = PlaylistFetcher::from_config(Arc::new(client), limiter, cache, config);
    let _info_sweeper = fetcher.info_cache().spawn_sweeper(config.cache.sweep_interval());
    Ok(SyncOrchestrator::new(
        store.clone(),
        fetcher,
        config.import.clone(),
        Some(events.clone()),
    ))
}

fn print_report(report: &ImportReport) {
    println!("{}", report.summary());
    if let Some(note) = &report.note {
        println!("  note: {}", note);
    }
    for item in &report.skipped_items {
        println!("  skipped {}: {}", item.video_id, item.reason);
    }
    for failure in report.failures.iter().skip(1) {
        println!("  failed: {}", failure);
    }
}
