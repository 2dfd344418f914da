// This file is part of cfcache.
// Copyright (c) 2019, Cloudflare. All rights reserved.
// See LICENSE for licensing information.

//! End-to-end tests against a scripted in-process cache server.
//!
//! The fixture speaks just enough of the text protocol for the client's
//! command set, so no external daemon is needed.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use sloggers::null::NullLoggerBuilder;
use sloggers::Build;

use cfcache::client::{Client, Expiry};
use cfcache::config::ClientConfig;
use cfcache::error::CacheError;

type Store = Arc<Mutex<HashMap<String, (u16, Vec<u8>)>>>;

/// Bind a fixture server and return its `host:port`.
fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let store: Store = Arc::new(Mutex::new(HashMap::new()));
    thread::spawn(move || {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(_) => break,
            };
            let store = store.clone();
            thread::spawn(move || serve(stream, store));
        }
    });
    addr
}

fn serve(stream: TcpStream, store: Store) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut stream = stream;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            return;
        }
        let trimmed = line.trim_end_matches("\r\n");
        let parts: Vec<&str> = trimmed.split(' ').collect();
        let reply_ok = match parts[0] {
            "set" | "add" | "replace" => {
                let key = parts[1];
                let flags: u16 = parts[2].parse().unwrap();
                let bytes: usize = parts[4].parse().unwrap();
                let mut payload = vec![0u8; bytes];
                reader.read_exact(&mut payload).unwrap();
                let mut crlf = [0u8; 2];
                reader.read_exact(&mut crlf).unwrap();

                let mut map = store.lock().unwrap();
                let exists = map.contains_key(key);
                let stored = match parts[0] {
                    "set" => true,
                    "add" => !exists,
                    _ => exists,
                };
                if stored {
                    map.insert(key.to_string(), (flags, payload));
                    stream.write_all(b"STORED\r\n")
                } else {
                    stream.write_all(b"NOT_STORED\r\n")
                }
            }
            "get" => {
                let map = store.lock().unwrap();
                let mut reply = Vec::new();
                for key in &parts[1..] {
                    if let Some((flags, payload)) = map.get(*key) {
                        reply
                            .extend_from_slice(
                                format!("VALUE {} {} {}\r\n", key, flags, payload.len())
                                    .as_bytes(),
                            );
                        reply.extend_from_slice(payload);
                        reply.extend_from_slice(b"\r\n");
                    }
                }
                reply.extend_from_slice(b"END\r\n");
                stream.write_all(&reply)
            }
            "delete" => {
                let removed = store.lock().unwrap().remove(parts[1]).is_some();
                if removed {
                    stream.write_all(b"DELETED\r\n")
                } else {
                    stream.write_all(b"NOT_FOUND\r\n")
                }
            }
            "incr" | "decr" => {
                let key = parts[1];
                let delta: u64 = parts[2].parse().unwrap();
                let mut map = store.lock().unwrap();
                match map.get(key).cloned() {
                    None => stream.write_all(b"NOT_FOUND\r\n"),
                    Some((flags, payload)) => {
                        let current: u64 =
                            String::from_utf8(payload).unwrap().trim().parse().unwrap();
                        let next = if parts[0] == "incr" {
                            current.wrapping_add(delta)
                        } else {
                            current.saturating_sub(delta)
                        };
                        map.insert(key.to_string(), (flags, next.to_string().into_bytes()));
                        stream.write_all(format!("{}\r\n", next).as_bytes())
                    }
                }
            }
            "flush_all" => {
                store.lock().unwrap().clear();
                stream.write_all(b"OK\r\n")
            }
            "stats" => stream.write_all(
                b"STAT pid 1\r\nSTAT version fixture 0.1\r\nSTAT curr_items 0\r\nEND\r\n",
            ),
            "version" => stream.write_all(b"VERSION fixture 0.1\r\n"),
            _ => stream.write_all(b"ERROR\r\n"),
        };
        if reply_ok.is_err() {
            return;
        }
    }
}

fn quiet_logger() -> slog::Logger {
    NullLoggerBuilder.build().unwrap()
}

fn client_for(servers: Vec<String>) -> Client {
    let mut config = ClientConfig::new(servers);
    config.send_receive_timeout = Duration::from_millis(500);
    config.dead_server_retry_interval = Duration::from_millis(200);
    Client::new(config, &quiet_logger()).unwrap()
}

#[test]
fn set_then_get_round_trips() {
    let client = client_for(vec![spawn_server()]);

    assert!(client.set("mystring", &b"hi"[..], Expiry::Never).unwrap());
    let value: Option<String> = client.get("mystring").unwrap();
    assert_eq!(value, Some(String::from("hi")));

    let raw: Option<Vec<u8>> = client.get("mystring").unwrap();
    assert_eq!(raw, Some(b"hi".to_vec()));
}

#[test]
fn missing_keys_come_back_null() {
    let client = client_for(vec![spawn_server()]);
    let value: Option<Vec<u8>> = client.get("never_stored").unwrap();
    assert_eq!(value, None);
}

#[test]
fn set_is_idempotent_and_add_replace_guard_existence() {
    let client = client_for(vec![spawn_server()]);

    assert!(client.set("k", "v", Expiry::Never).unwrap());
    assert!(client.set("k", "v", Expiry::Never).unwrap());
    let value: Option<String> = client.get("k").unwrap();
    assert_eq!(value, Some(String::from("v")));

    // add on an existing key fails; replace on a missing one fails.
    assert!(!client.add("k", "other", Expiry::Never).unwrap());
    assert!(!client.replace("absent", "other", Expiry::Never).unwrap());
    assert!(client.replace("k", "newer", Expiry::Never).unwrap());
    assert!(client.add("fresh", "first", Expiry::Never).unwrap());
}

#[test]
fn delete_reports_whether_the_key_existed() {
    let client = client_for(vec![spawn_server()]);

    assert!(client.set("doomed", "x", Expiry::Never).unwrap());
    assert!(client.delete("doomed").unwrap());
    assert!(!client.delete("doomed").unwrap());
}

#[test]
fn counters_follow_the_server_arithmetic() {
    let client = client_for(vec![spawn_server()]);

    assert!(client.set_counter("c", 9000).unwrap());
    assert_eq!(client.increment("c", 1).unwrap(), Some(9001));
    assert_eq!(client.decrement("c", 9001).unwrap(), Some(0));
    // Decrement clamps at zero.
    assert_eq!(client.decrement("c", 1).unwrap(), Some(0));

    assert_eq!(client.increment("missing_counter", 5).unwrap(), None);
}

#[test]
fn invalid_keys_raise_before_any_io() {
    let client = client_for(vec![spawn_server()]);
    match client.set("bad key", "value", Expiry::Never) {
        Err(CacheError::InvalidKey(_)) => {}
        other => panic!("expected InvalidKey, got {:?}", other),
    }
    match client.get::<Vec<u8>>("bad\tkey") {
        Err(CacheError::InvalidKey(_)) => {}
        other => panic!("expected InvalidKey, got {:?}", other),
    }
    assert_eq!(client.in_flight(), 0);
}

#[test]
fn multi_get_fans_out_and_aligns_results() {
    let servers = vec![spawn_server(), spawn_server(), spawn_server()];
    let client = client_for(servers);

    let keys: Vec<String> = (0..30).map(|n| format!("key{}", n)).collect();
    for key in &keys {
        assert!(client.set(key, key.as_str(), Expiry::Never).unwrap());
    }

    let refs: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
    let values: Vec<Option<String>> = client.get_multi(&refs).unwrap();
    assert_eq!(values.len(), keys.len());
    for (key, value) in keys.iter().zip(values) {
        assert_eq!(value, Some(key.clone()));
    }
    assert_eq!(client.in_flight(), 0);
}

#[test]
fn multi_get_fills_every_slot_of_a_duplicate_key() {
    let client = client_for(vec![spawn_server()]);

    assert!(client.set("dup", "d", Expiry::Never).unwrap());
    let values: Vec<Option<String>> = client.get_multi(&["dup", "dup", "missing"]).unwrap();
    assert_eq!(
        values,
        vec![Some(String::from("d")), Some(String::from("d")), None]
    );
}

#[test]
fn multi_get_leaves_dead_server_slots_null() {
    // Two live servers plus one address nothing listens on.
    let dead_addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let client = client_for(vec![spawn_server(), spawn_server(), dead_addr]);

    let keys: Vec<String> = (0..30).map(|n| format!("key{}", n)).collect();
    let mut stored = Vec::new();
    for key in &keys {
        stored.push(client.set(key, key.as_str(), Expiry::Never).unwrap());
    }
    // The dead server owns a share of the keys.
    assert!(stored.iter().any(|ok| *ok));
    assert!(stored.iter().any(|ok| !*ok));

    let refs: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
    let values: Vec<Option<String>> = client.get_multi(&refs).unwrap();
    assert_eq!(values.len(), keys.len());
    for ((key, value), ok) in keys.iter().zip(&values).zip(&stored) {
        if *ok {
            assert_eq!(value.as_ref(), Some(key));
        } else {
            assert_eq!(value.as_ref(), None);
        }
    }
    assert_eq!(client.in_flight(), 0);
}

#[test]
fn key_prefix_is_stripped_from_reply_keys() {
    let server = spawn_server();
    let mut config = ClientConfig::new(vec![server]);
    config.key_prefix = String::from("app:");
    config.send_receive_timeout = Duration::from_millis(500);
    let client = Client::new(config, &quiet_logger()).unwrap();

    assert!(client.set("user7", "alice", Expiry::Never).unwrap());
    let value: Option<String> = client.get("user7").unwrap();
    assert_eq!(value, Some(String::from("alice")));

    // Multi-get has to map the prefixed reply key back to positions.
    let values: Vec<Option<String>> = client.get_multi(&["user7", "user8"]).unwrap();
    assert_eq!(values, vec![Some(String::from("alice")), None]);

    // An unprefixed client sees the key under its wire name only.
    let bare = client_for(client.servers().to_vec());
    let hidden: Option<String> = bare.get("user7").unwrap();
    assert_eq!(hidden, None);
    let visible: Option<String> = bare.get("app:user7").unwrap();
    assert_eq!(visible, Some(String::from("alice")));
}

#[test]
fn flush_all_clears_every_server() {
    let client = client_for(vec![spawn_server(), spawn_server()]);

    let keys: Vec<String> = (0..10).map(|n| format!("key{}", n)).collect();
    for key in &keys {
        assert!(client.set(key, "x", Expiry::Never).unwrap());
    }
    assert!(client.flush_all());
    for key in &keys {
        assert_eq!(client.get::<Vec<u8>>(key).unwrap(), None);
    }
}

#[test]
fn flush_all_fails_when_a_server_is_dead() {
    let dead_addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let client = client_for(vec![spawn_server(), dead_addr]);
    assert!(!client.flush_all());
}

#[test]
fn stats_and_version_report_per_server() {
    let client = client_for(vec![spawn_server(), spawn_server()]);

    let stats = client.stats();
    assert_eq!(stats.len(), 2);
    for (_, map) in stats {
        let map = map.expect("live fixture must report stats");
        assert_eq!(map.get("pid").map(|v| v.as_str()), Some("1"));
        assert_eq!(map.get("version").map(|v| v.as_str()), Some("fixture 0.1"));
    }

    for (_, version) in client.version() {
        assert_eq!(version, Some(String::from("fixture 0.1")));
    }
}

#[test]
fn status_reports_counters_and_probe_results() {
    let client = client_for(vec![spawn_server()]);

    assert!(client.set("k", "v", Expiry::Never).unwrap());
    let status = client.status();
    assert_eq!(status.len(), 1);
    let server = &status[0];
    assert!(server.pool.alive);
    assert_eq!(server.version, Some(String::from("fixture 0.1")));
    // Every lease went back: nothing is held, nothing leaked.
    assert_eq!(server.pool.acquired, 0);
    assert!(server.pool.new_sockets >= 1);
    assert_eq!(client.in_flight(), 0);
}

#[test]
fn dead_server_backoff_applies_to_commands() {
    // A server that accepts one connection, then disappears for good.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        drop(stream);
        // The listener itself is dropped here, freeing the port.
    });

    let mut config = ClientConfig::new(vec![addr]);
    config.send_receive_timeout = Duration::from_millis(200);
    config.dead_server_retry_interval = Duration::from_millis(300);
    let client = Client::new(config, &quiet_logger()).unwrap();

    // The connect succeeds but the command fails on the closed stream.
    assert!(!client.set("k", "v", Expiry::Never).unwrap());
    // Give the fixture thread time to drop its listener.
    thread::sleep(Duration::from_millis(50));

    // The next attempt cannot connect and trips the pool to dead; the rest
    // of the window returns sentinels without touching the network.
    assert!(!client.set("k", "v", Expiry::Never).unwrap());
    let failed_after_trip = client.status()[0].pool.failed_new_sockets;
    assert_eq!(failed_after_trip, 1);
    for _ in 0..10 {
        assert!(!client.set("k", "v", Expiry::Never).unwrap());
    }
    assert_eq!(client.status()[0].pool.failed_new_sockets, failed_after_trip);

    // Once the window passes, a new connect is attempted.
    thread::sleep(Duration::from_millis(400));
    assert!(!client.set("k", "v", Expiry::Never).unwrap());
    assert!(client.status()[0].pool.failed_new_sockets > failed_after_trip);
    assert_eq!(client.in_flight(), 0);
}

#[test]
fn single_server_cluster_works_end_to_end() {
    // The single-host shortcut must still route every key correctly.
    let client = client_for(vec![spawn_server()]);
    for n in 0..20 {
        let key = format!("solo{}", n);
        assert!(client.set(&key, key.as_str(), Expiry::Never).unwrap());
        let value: Option<String> = client.get(&key).unwrap();
        assert_eq!(value, Some(key));
    }
}
