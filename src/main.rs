//! geoguard - maintenance CLI.
//!
//! Inspects and edits ban storage and queries providers using the same
//! configuration file as the embedding application.

use anyhow::{Context, bail};
use geoguard::config::{Config, validation};
use geoguard::resolver::{GeoContextResolver, MemoryContextCache};
use geoguard::security::BanManager;
use geoguard::security::ban::{BAN_SOURCE, ban_ttl};
use geoguard::storage::{self, BanInfo, Storage, StorageDsn};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage: geoguard [-c config.toml] <command> [args]

commands:
  check-config                     validate the configuration
  ban <ip> [duration] [reason]     ban an address (duration \"permanent\" for no expiry)
  unban <ip>                       lift a ban and forget attempts
  bans                             list active bans
  clean                            delete expired bans
  stats                            storage statistics
  attempts <ip>                    attempts recorded for an address
  lookup <ip> [provider]           query a provider, bypassing the cache";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = match args.iter().position(|a| a == "-c" || a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = args.remove(i + 1);
            args.remove(i);
            path
        }
        Some(_) => bail!("-c needs a path\n\n{USAGE}"),
        None => "geoguard.toml".to_string(),
    };

    let Some(command) = args.first().cloned() else {
        eprintln!("{USAGE}");
        return Ok(());
    };
    let rest = &args[1..];

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    match command.as_str() {
        "check-config" => check_config(&config),
        "ban" => {
            let ip = parse_ip(rest.first())?;
            let duration = rest.get(1).map(String::as_str);
            let reason = rest.get(2).map(String::as_str).unwrap_or("manual ban");
            ban(&config, ip, duration, reason).await
        }
        "unban" => {
            let ip = parse_ip(rest.first())?;
            let bans = BanManager::new(open_storage(&config).await?, config.bans.clone());
            let bucket = BanManager::ip_bucket(&ip.to_string());
            if bans.clear(&bucket).await {
                println!("unbanned {bucket}");
            } else {
                println!("{bucket} was not banned");
            }
            Ok(())
        }
        "bans" => list_bans(&config).await,
        "clean" => {
            let removed = open_storage(&config).await?.clean_expired_bans().await?;
            println!("removed {removed} expired ban(s)");
            Ok(())
        }
        "stats" => {
            let stats = open_storage(&config).await?.get_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        "attempts" => {
            let ip = parse_ip(rest.first())?;
            let storage = open_storage(&config).await?;
            let bucket = BanManager::ip_bucket(&ip.to_string());
            let count = storage.get_attempts(&bucket).await?;
            match storage.get_attempts_ttl(&bucket).await? {
                Some(ttl) => println!("{bucket}: {count} attempt(s), window resets in {ttl}s"),
                None => println!("{bucket}: {count} attempt(s)"),
            }
            Ok(())
        }
        "lookup" => {
            let ip = parse_ip(rest.first())?;
            let resolver = GeoContextResolver::new(
                config.resolver.clone(),
                &config.providers,
                Arc::new(MemoryContextCache::new(1)),
            )?;
            let context = resolver
                .lookup(ip, rest.get(1).map(String::as_str))
                .await
                .with_context(|| format!("lookup of {ip} failed"))?;
            println!("{}", serde_json::to_string_pretty(&context)?);
            Ok(())
        }
        other => bail!("unknown command '{other}'\n\n{USAGE}"),
    }
}

fn parse_ip(arg: Option<&String>) -> anyhow::Result<IpAddr> {
    let raw = arg.context("missing <ip> argument")?;
    raw.trim()
        .parse()
        .with_context(|| format!("'{raw}' is not an IP address"))
}

async fn open_storage(config: &Config) -> anyhow::Result<Arc<dyn Storage>> {
    let dsn = StorageDsn::parse(&config.storage.dsn)?;
    Ok(storage::connect(&dsn).await?)
}

fn check_config(config: &Config) -> anyhow::Result<()> {
    let mut problems: Vec<String> = match validation::validate(config) {
        Ok(()) => Vec::new(),
        Err(errors) => errors.iter().map(ToString::to_string).collect(),
    };
    if let Err(e) = StorageDsn::parse(&config.storage.dsn) {
        problems.push(e.to_string());
    }
    if let Err(e) = GeoContextResolver::new(
        config.resolver.clone(),
        &config.providers,
        Arc::new(MemoryContextCache::new(1)),
    ) {
        problems.push(e.to_string());
    }

    if problems.is_empty() {
        info!(providers = config.providers.len(), "Configuration is valid");
        println!("ok");
        return Ok(());
    }
    for problem in &problems {
        println!("error: {problem}");
    }
    bail!("{} configuration problem(s)", problems.len())
}

async fn ban(config: &Config, ip: IpAddr, duration: Option<&str>, reason: &str) -> anyhow::Result<()> {
    let ttl = match duration {
        Some("permanent") => None,
        Some(d) => {
            if geoguard::security::parse_ban_duration(d).is_none() {
                bail!("invalid duration '{d}'");
            }
            Some(ban_ttl(d, config.bans.ttl))
        }
        None => Some(ban_ttl(&config.bans.duration, config.bans.ttl)),
    };

    let storage = open_storage(config).await?;
    let bucket = BanManager::ip_bucket(&ip.to_string());
    let info = BanInfo::new(reason, format!("{BAN_SOURCE}-cli"));
    storage.ban_ip(&bucket, &info, ttl).await?;

    match ttl {
        Some(secs) => println!("banned {bucket} for {secs}s"),
        None => println!("banned {bucket} permanently"),
    }
    Ok(())
}

async fn list_bans(config: &Config) -> anyhow::Result<()> {
    let mut bans = open_storage(config).await?.get_all_banned().await?;
    bans.sort_by_key(|b| b.created_at);

    if bans.is_empty() {
        println!("no active bans");
        return Ok(());
    }
    for ban in bans {
        let expires = ban
            .expires_at
            .and_then(|at| chrono::DateTime::from_timestamp(at, 0))
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".into());
        println!(
            "{:<40} hits={:<4} expires={} source={} reason={}",
            ban.bucket, ban.hits, expires, ban.source, ban.reason
        );
    }
    Ok(())
}
