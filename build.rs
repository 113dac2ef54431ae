// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn package_arg(help: &'static str) -> Arg {
    Arg::new("package").help(help)
}

fn build_cli() -> Command {
    Command::new("zenit")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Zenit Contributors")
        .about("Package manager for RPM-based distributions")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_name("PATH")
                .default_value("/etc/zenit/sources.list")
                .help("Repository list"),
        )
        .arg(
            Arg::new("cache_dir")
                .long("cache-dir")
                .global(true)
                .value_name("DIR")
                .default_value("/var/cache/zenit")
                .help("Metadata and package cache directory"),
        )
        .arg(
            Arg::new("db_path")
                .long("db-path")
                .global(true)
                .value_name("PATH")
                .default_value("/var/lib/zenit/zenit.db")
                .help("Installed-state database"),
        )
        .arg(
            Arg::new("keyring_dir")
                .long("keyring-dir")
                .global(true)
                .value_name("DIR")
                .default_value("/etc/zenit/keys")
                .help("Directory holding repository signing keys (<repo>.asc)"),
        )
        .arg(
            Arg::new("assume_yes")
                .short('y')
                .long("assume-yes")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Answer yes to confirmation prompts"),
        )
        .subcommand(Command::new("update").about("Refresh repository metadata"))
        .subcommand(
            Command::new("install")
                .about("Install a package (optionally `name>=version`)")
                .arg(package_arg("Package name or capability").required(true)),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove an installed package")
                .arg(package_arg("Package name").required(true))
                .arg(
                    Arg::new("cascade")
                        .long("cascade")
                        .action(ArgAction::SetTrue)
                        .help("Also remove installed packages that depend on it"),
                ),
        )
        .subcommand(
            Command::new("search")
                .about("Search available packages by name or summary")
                .arg(Arg::new("pattern").required(true).help("Substring, or a glob such as 'lib*'")),
        )
        .subcommand(
            Command::new("list")
                .about("List packages")
                .subcommand_required(true)
                .subcommand(Command::new("installed").about("Installed packages")),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Upgrade installed packages to their newest versions")
                .arg(package_arg("Only this package")),
        )
        .subcommand(
            Command::new("dist-upgrade")
                .about("Synchronize installed packages with the preferred repositories")
                .arg(package_arg("Only this package")),
        )
        .subcommand(
            Command::new("repo")
                .about("Manage repositories")
                .subcommand_required(true)
                .subcommand(
                    Command::new("add")
                        .about("Add a repository")
                        .arg(Arg::new("name").required(true))
                        .arg(Arg::new("url").required(true))
                        .arg(Arg::new("type").long("type").default_value("rpm-md").help("Metadata format"))
                        .arg(Arg::new("priority").long("priority").default_value("100"))
                        .arg(
                            Arg::new("no_gpgcheck")
                                .long("no-gpgcheck")
                                .action(ArgAction::SetTrue)
                                .help("Skip signature checks for this repository"),
                        )
                        .arg(
                            Arg::new("disabled")
                                .long("disabled")
                                .action(ArgAction::SetTrue)
                                .help("Add the repository disabled"),
                        )
                        .arg(Arg::new("mirrorlist").long("mirrorlist").help("URL of a list of mirror base URLs"))
                        .arg(Arg::new("description").long("description").default_value(""))
                        .arg(Arg::new("gpgkey").long("gpgkey").help("Signing key to import: a file path or a URL")),
                )
                .subcommand(Command::new("remove").about("Remove a repository").arg(Arg::new("name").required(true)))
                .subcommand(Command::new("list").about("List repositories"))
                .subcommand(Command::new("enable").about("Enable a repository").arg(Arg::new("name").required(true)))
                .subcommand(Command::new("disable").about("Disable a repository").arg(Arg::new("name").required(true))),
        )
        .subcommand(Command::new("history").about("Show transaction history"))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(Arg::new("shell").required(true).help("bash, zsh, fish, elvish or powershell")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("zenit.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
