//! Example: dump a Ceph configuration file
//!
//! Usage:
//!   cargo run --example parse_config /path/to/ceph.conf [entity]

use cephconfig::{expand_metavariables, CephConfig};
use std::env;

fn main() {
    let args: Vec<String> = env::args().collect();
    let config_path = args.get(1).map(String::as_str).unwrap_or("/etc/ceph/ceph.conf");
    let entity = args.get(2).map(String::as_str).unwrap_or("client.admin");

    let config = match CephConfig::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error parsing config file: {}", e);
            std::process::exit(1);
        }
    };

    let mut sections = config.sections();
    sections.sort();
    println!("Sections:");
    for section in sections {
        println!("  [{}]", section);
    }

    let lookup = [entity, "client", "global"];
    for key in ["keyring", "auth client required", "striper data dir"] {
        match config.get_with_fallback(&lookup, key) {
            Some(value) => println!("{} = {}", key, expand_metavariables(value, entity)),
            None => println!("{} (unset)", key),
        }
    }
}
