use std::time::Duration;

use anyhow::Context;
use clap::Parser;

mod app;
mod cli;
mod config;
mod geocode;
mod places;
mod render;
mod search;
mod semantic;
#[cfg(test)]
mod tests;
mod web;

use app::AppFactory;
use config::Secrets;

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn spinner(message: &str) -> indicatif::ProgressBar {
    let pb = indicatif::ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message.to_string());
    pb
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging();

    let config = AppFactory::load_config()?;

    match args.command {
        cli::Command::Serve { addr } => {
            let secrets = Secrets::from_env(&config)?;
            let search = AppFactory::create_search(&config, &secrets)?;
            let bind = addr.unwrap_or_else(|| config.server.bind.clone());

            web::start_daemon(
                web::SharedState {
                    search: std::sync::Arc::new(search),
                    config,
                    maps_api_key: secrets.maps_api_key,
                },
                bind,
            )
        }

        cli::Command::Search {
            query,
            min_similarity,
            max_results,
            no_geocode,
        } => {
            let search_config =
                search::search_settings(&config.search, min_similarity, max_results)?;
            let secrets = Secrets::from_env(&config)?;
            let search = AppFactory::create_search(&config, &secrets)?;

            let pb = spinner("searching...");
            if no_geocode {
                let candidates = search.rank(&query, &search_config);
                pb.finish_and_clear();
                println!("{}", serde_json::to_string_pretty(&candidates?)?);
            } else {
                let response = search.search(&query, &search_config);
                pb.finish_and_clear();
                let response = response?;
                if response.is_empty() {
                    log::warn!("no places met the minimum similarity, try lowering it");
                }
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
            Ok(())
        }

        cli::Command::Geocode { name, address } => {
            let secrets = Secrets::from_env(&config)?;
            let resolver = AppFactory::create_resolver(&config, &secrets)?;
            let coords = resolver.resolve(&name, &address)?;
            println!("{}", serde_json::to_string_pretty(&coords)?);
            Ok(())
        }

        cli::Command::Inspect {} => {
            let catalog = AppFactory::open_catalog(&config, None)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "base_path": config.base_path(),
                    "index_path": config.index_path(),
                    "places_path": config.places_path(),
                    "places": catalog.len(),
                    "dimensions": catalog.dimensions(),
                    "embedding_provider": config.embedding.provider,
                    "embedding_model": config.embedding.model,
                }))
                .context("Failed to serialize catalog info")?
            );
            Ok(())
        }
    }
}
