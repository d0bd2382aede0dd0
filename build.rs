// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: snapshot file
fn snapshot_arg() -> Arg {
    Arg::new("snapshot")
        .short('s')
        .long("snapshot")
        .value_name("FILE")
        .required(true)
        .help("JSON snapshot of the system state and the desired actions")
}

/// Common argument: configuration file
fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("TOML configuration file")
}

/// Common argument: archive directory
fn archive_dir_arg() -> Arg {
    Arg::new("archive_dir")
        .short('a')
        .long("archive-dir")
        .value_name("DIR")
        .help("Directory holding the downloaded archives")
}

fn build_cli() -> Command {
    Command::new("orderly")
        .version(env!("CARGO_PKG_VERSION"))
        .author("orderly Contributors")
        .about("Order and run package transactions on dpkg-based systems")
        .subcommand_required(true)
        .subcommand(
            Command::new("plan")
                .about("Show the action sequence for a snapshot without running anything")
                .arg(snapshot_arg())
                .arg(config_arg())
                .arg(archive_dir_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(clap::ArgAction::SetTrue)
                        .help("Print the actions as JSON"),
                )
                .arg(
                    Arg::new("batches")
                        .long("batches")
                        .action(clap::ArgAction::SetTrue)
                        .help("Also show the back-end batches"),
                ),
        )
        .subcommand(
            Command::new("apply")
                .about("Order a snapshot and run the actions through dpkg")
                .arg(snapshot_arg())
                .arg(config_arg())
                .arg(archive_dir_arg())
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(clap::ArgAction::SetTrue)
                        .help("Record the batches instead of invoking dpkg"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration")
                .arg(config_arg()),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("orderly.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
