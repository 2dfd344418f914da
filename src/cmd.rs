// This file is part of cfcache.
// Copyright (c) 2019, Cloudflare. All rights reserved.
// See LICENSE for licensing information.

//! Command line argument definitions and validations.

use clap::{App, Arg, SubCommand};

/// Create the subcommand `get`.
fn create_clap_get_subcommand<'a, 'b>() -> App<'a, 'b> {
    SubCommand::with_name("get")
        .about("Fetches a value and prints it to stdout")
        .arg(Arg::with_name("key").index(1).required(true)
            .help("The key to fetch"))
}

/// Create the subcommand `set`.
fn create_clap_set_subcommand<'a, 'b>() -> App<'a, 'b> {
    let args = [
        Arg::with_name("key").index(1).required(true)
            .help("The key to store under"),
        Arg::with_name("value").index(2).required(true)
            .help("The value to store"),
        Arg::with_name("expiry").long("expiry").short("e").takes_value(true).required(false)
            .help("Expiry in seconds. Zero (the default) means the value never expires."),
    ];

    SubCommand::with_name("set")
        .about("Stores a value")
        .args(&args)
}

/// Create the subcommand `delete`.
fn create_clap_delete_subcommand<'a, 'b>() -> App<'a, 'b> {
    SubCommand::with_name("delete")
        .about("Deletes a key")
        .arg(Arg::with_name("key").index(1).required(true)
            .help("The key to delete"))
}

/// Create the subcommand `incr`.
fn create_clap_incr_subcommand<'a, 'b>() -> App<'a, 'b> {
    let args = [
        Arg::with_name("key").index(1).required(true)
            .help("The counter key"),
        Arg::with_name("delta").index(2).required(true)
            .help("How much to add"),
    ];

    SubCommand::with_name("incr")
        .about("Increments a counter and prints the new value")
        .args(&args)
}

/// Create the subcommand `decr`.
fn create_clap_decr_subcommand<'a, 'b>() -> App<'a, 'b> {
    let args = [
        Arg::with_name("key").index(1).required(true)
            .help("The counter key"),
        Arg::with_name("delta").index(2).required(true)
            .help("How much to subtract. The server clamps at zero."),
    ];

    SubCommand::with_name("decr")
        .about("Decrements a counter and prints the new value")
        .args(&args)
}

/// Create the subcommand `flush`.
fn create_clap_flush_subcommand<'a, 'b>() -> App<'a, 'b> {
    SubCommand::with_name("flush")
        .about("Flushes every server in the cluster")
}

/// Create the subcommand `stats`.
fn create_clap_stats_subcommand<'a, 'b>() -> App<'a, 'b> {
    SubCommand::with_name("stats")
        .about("Prints each server's stats map")
}

/// Create the subcommand `status`.
fn create_clap_status_subcommand<'a, 'b>() -> App<'a, 'b> {
    SubCommand::with_name("status")
        .about("Prints pool counters and liveness for each server")
}

/// Create the whole command-line configuration.
pub fn create_clap_command() -> App<'static, 'static> {
    App::new(env!("CARGO_PKG_NAME"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::with_name("debug").long("debug").short("d")
                .help("Turns on debug logging"),
        )
        .arg(
            Arg::with_name("servers").long("servers").short("s").takes_value(true)
                .help("Comma-separated server addresses, each host or host:port \
                       (port defaults to 11211)"),
        )
        .arg(
            Arg::with_name("configfile").long("file").short("f").takes_value(true)
                .help("Specifies a path to the configuration file. Ignored when --servers \
                       is given."),
        )
        .subcommands(vec![
            // List of all available subcommands.
            create_clap_get_subcommand(),
            create_clap_set_subcommand(),
            create_clap_delete_subcommand(),
            create_clap_incr_subcommand(),
            create_clap_decr_subcommand(),
            create_clap_flush_subcommand(),
            create_clap_stats_subcommand(),
            create_clap_status_subcommand(),
        ])
}
