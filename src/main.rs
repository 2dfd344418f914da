// This file is part of cfcache.
// Copyright (c) 2019, Cloudflare. All rights reserved.
// See LICENSE for licensing information.

mod cmd;

use std::process;
use std::time::Duration;

use slog::debug;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

use cfcache::client::{Client, Expiry};
use cfcache::config::ClientConfig;

/// Create a logger to be used throughout cfcache.
fn create_logger<'a>(matches: &clap::ArgMatches<'a>) -> slog::Logger {
    let mut builder = TerminalLoggerBuilder::new();

    // Default severity level is info.
    builder.level(Severity::Info);
    // Write all logs to stderr.
    builder.destination(Destination::Stderr);

    // If in debug mode, change severity level to debug.
    if matches.is_present("debug") {
        builder.level(Severity::Debug);
    }

    // According to `sloggers-0.3.2` source code, the function doesn't return an error at all.
    // There should be no problem unwrapping here. It has a return type `Result` because it's a
    // signature for `sloggers::Build` trait.
    builder.build().expect("BUG: TerminalLoggerBuilder::build shouldn't return an error.")
}

/// Resolve the client configuration from --servers or --file.
fn load_config<'a>(matches: &clap::ArgMatches<'a>) -> Result<ClientConfig, String> {
    if let Some(servers) = matches.value_of("servers") {
        let servers = servers.split(',').map(|s| s.trim().to_string()).collect();
        return Ok(ClientConfig::new(servers));
    }
    if let Some(config_file) = matches.value_of("configfile") {
        return ClientConfig::parse(config_file)
            .map_err(|err| format!("cannot parse {}: {}", config_file, err));
    }
    Err(String::from("specify servers with --servers or --file"))
}

/// The entry point of cfcache.
fn main() {
    // According to the documentation of `get_matches`, if the parsing fails, an error will be
    // displayed to the user and the process will exit with an error code.
    let matches = cmd::create_clap_command().get_matches();

    let logger = create_logger(&matches);

    // After calling this, slog_stdlog will forward all the `log` crate logging to
    // `slog_scope::logger()`.
    slog_stdlog::init().expect("BUG: `set_logger` has already been called");

    // _scope_guard can be used to reset the global logger. You can do it by just dropping it.
    let _scope_guard = slog_scope::set_global_logger(logger.clone());

    if matches.subcommand_name().is_none() {
        eprintln!("Please specify a valid subcommand: get, set, delete, incr, decr, flush, \
                   stats, or status.");
        process::exit(1);
    }

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };

    let client = match Client::new(config, &logger) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Cannot create the client: {}", err);
            process::exit(1);
        }
    };

    if let Some(get) = matches.subcommand_matches("get") {
        let key = get.value_of("key").unwrap();
        match client.get::<Vec<u8>>(key) {
            Ok(Some(value)) => {
                println!("{}", String::from_utf8_lossy(&value));
            }
            Ok(None) => {
                eprintln!("not found");
                process::exit(2);
            }
            Err(err) => {
                eprintln!("{}", err);
                process::exit(1);
            }
        }
    }

    if let Some(set) = matches.subcommand_matches("set") {
        let key = set.value_of("key").unwrap();
        let value = set.value_of("value").unwrap();
        let expiry = match set.value_of("expiry") {
            None => Expiry::Never,
            Some("0") => Expiry::Never,
            Some(seconds) => match seconds.parse::<u64>() {
                Ok(seconds) => Expiry::In(Duration::from_secs(seconds)),
                Err(_) => {
                    eprintln!("--expiry takes a number of seconds");
                    process::exit(1);
                }
            },
        };
        match client.set(key, value, expiry) {
            Ok(true) => debug!(logger, "stored"; "key" => key.to_owned()),
            Ok(false) => {
                eprintln!("not stored");
                process::exit(2);
            }
            Err(err) => {
                eprintln!("{}", err);
                process::exit(1);
            }
        }
    }

    if let Some(delete) = matches.subcommand_matches("delete") {
        let key = delete.value_of("key").unwrap();
        match client.delete(key) {
            Ok(true) => debug!(logger, "deleted"; "key" => key.to_owned()),
            Ok(false) => {
                eprintln!("not found");
                process::exit(2);
            }
            Err(err) => {
                eprintln!("{}", err);
                process::exit(1);
            }
        }
    }

    for verb in &["incr", "decr"] {
        if let Some(counter) = matches.subcommand_matches(verb) {
            let key = counter.value_of("key").unwrap();
            let delta = match counter.value_of("delta").unwrap().parse::<u64>() {
                Ok(delta) => delta,
                Err(_) => {
                    eprintln!("delta must be a non-negative integer");
                    process::exit(1);
                }
            };
            let result = if *verb == "incr" {
                client.increment(key, delta)
            } else {
                client.decrement(key, delta)
            };
            match result {
                Ok(Some(value)) => println!("{}", value),
                Ok(None) => {
                    eprintln!("not found");
                    process::exit(2);
                }
                Err(err) => {
                    eprintln!("{}", err);
                    process::exit(1);
                }
            }
        }
    }

    if matches.subcommand_matches("flush").is_some() {
        if client.flush_all() {
            println!("OK");
        } else {
            eprintln!("some servers did not acknowledge the flush");
            process::exit(2);
        }
    }

    if matches.subcommand_matches("stats").is_some() {
        for (host, stats) in client.stats() {
            match stats {
                Some(stats) => {
                    let mut names: Vec<&String> = stats.keys().collect();
                    names.sort();
                    for name in names {
                        println!("{} {} {}", host, name, stats[name]);
                    }
                }
                None => eprintln!("{}: no stats (server dead?)", host),
            }
        }
    }

    if matches.subcommand_matches("status").is_some() {
        for server in client.status() {
            let pool = &server.pool;
            println!(
                "{} alive={} version={} idle={} acquired={} new={} failed={} reused={} \
                 died_in_pool={} died_on_return={} dirty_on_return={} reconnects={}",
                pool.host,
                pool.alive,
                server.version.as_ref().map(|v| v.as_str()).unwrap_or("-"),
                pool.idle,
                pool.acquired,
                pool.new_sockets,
                pool.failed_new_sockets,
                pool.reused_sockets,
                pool.died_in_pool,
                pool.died_on_return,
                pool.dirty_on_return,
                pool.reconnects,
            );
        }
    }
}
