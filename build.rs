// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("strata")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Strata Contributors")
        .about("Compile declarative items into an immutable image layer")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log every privileged command"),
        )
        .subcommand(
            Command::new("build")
                .about("Build one layer into a subvolume")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .required(true)
                        .value_name("PATH")
                        .help("Layer file ([layer] options and [[item]] tables)"),
                )
                .arg(
                    Arg::new("subvol")
                        .short('s')
                        .long("subvol")
                        .required(true)
                        .value_name("PATH")
                        .help("Subvolume to build into"),
                )
                .arg(
                    Arg::new("no_readonly")
                        .long("no-readonly")
                        .action(ArgAction::SetTrue)
                        .help("Leave the result writable"),
                ),
        )
        .subcommand(
            Command::new("artifacts-dir")
                .about("Print the per-repository artifacts directory, creating it if needed")
                .arg(
                    Arg::new("path_in_repo")
                        .long("path-in-repo")
                        .value_name("PATH")
                        .help("Any path inside the repository (default: current directory)"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=OUT_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = out_dir.join("man");

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

    let man_path = man_dir.join("strata.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
