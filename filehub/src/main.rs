use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Arg, ArgAction, ArgMatches, Command, arg, command, crate_name, value_parser};
use client::UploadParams;

mod cli;

const DEFAULT_URI: &str = "http://localhost:9000";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = build_cli().get_matches();

    if cli.subcommand_matches(cli::VERSION_SUBCOMMAND).is_some() {
        cli::version::run();
        ExitCode::SUCCESS
    } else if cli.subcommand_matches(cli::SERVER_SUBCOMMAND).is_some() {
        cli::server::run().await
    } else if let Some(m) = cli.subcommand_matches(cli::UPLOAD_SUBCOMMAND) {
        cli::client::upload(upload_params(m)).await
    } else if let Some(m) = cli.subcommand_matches(cli::LIST_SUBCOMMAND) {
        let path = m.get_one::<String>("path").map(String::as_str);
        let search = m.get_one::<String>("search").map(String::as_str);
        cli::client::list(uri(m), path, search).await
    } else if let Some(m) = cli.subcommand_matches(cli::STATS_SUBCOMMAND) {
        cli::client::stats(uri(m)).await
    } else if let Some(m) = cli.subcommand_matches(cli::DELETE_SUBCOMMAND) {
        let ids: Vec<String> = m.get_many::<String>("ID").unwrap_or_default().cloned().collect();
        cli::client::delete(uri(m), &ids).await
    } else if let Some(m) = cli.subcommand_matches(cli::DOWNLOAD_SUBCOMMAND) {
        let id = m.get_one::<String>("ID").map(String::as_str).unwrap_or_default();
        let output = m.get_one::<PathBuf>("output").map(PathBuf::as_path);
        cli::client::download(uri(m), id, output).await
    } else {
        ExitCode::SUCCESS
    }
}

fn build_cli() -> Command {
    command!(crate_name!())
        .version(clap::crate_version!())
        .about(clap::crate_description!())
        .subcommand(Command::new(cli::VERSION_SUBCOMMAND).about(cli::VERSION_DESCRIPTION))
        .subcommand(Command::new(cli::SERVER_SUBCOMMAND).about(cli::SERVER_DESCRIPTION))
        .subcommand(
            Command::new(cli::UPLOAD_SUBCOMMAND)
                .about(cli::UPLOAD_DESCRIPTION)
                .arg(uri_arg())
                .arg(
                    arg!(-f --file <FILE>)
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to file to upload"),
                )
                .arg(arg!(-d --dir <DIR>).help("Folder on the server, root when omitted"))
                .arg(arg!(--force).help("Overwrite a file that already exists"))
                .arg(
                    arg!(--"chunk-size" <BYTES>)
                        .value_parser(value_parser!(u64).range(1..))
                        .help("Chunk size in bytes, 5 MiB when omitted"),
                )
                .arg(
                    arg!(-c --concurrency <COUNT>)
                        .value_parser(value_parser!(u16).range(1..))
                        .help("Chunks sent at the same time, 3 when omitted"),
                ),
        )
        .subcommand(
            Command::new(cli::LIST_SUBCOMMAND)
                .about(cli::LIST_DESCRIPTION)
                .arg(uri_arg())
                .arg(arg!(-p --path <PATH>).help("Folder to list, root when omitted"))
                .arg(arg!(-s --search <TERM>).help("Case insensitive name filter")),
        )
        .subcommand(
            Command::new(cli::STATS_SUBCOMMAND)
                .about(cli::STATS_DESCRIPTION)
                .arg(uri_arg()),
        )
        .subcommand(
            Command::new(cli::DELETE_SUBCOMMAND)
                .about(cli::DELETE_DESCRIPTION)
                .arg(uri_arg())
                .arg(
                    Arg::new("ID")
                        .required(true)
                        .num_args(1..)
                        .action(ArgAction::Append)
                        .help("File ids, or dir-<path> for directories"),
                ),
        )
        .subcommand(
            Command::new(cli::DOWNLOAD_SUBCOMMAND)
                .about(cli::DOWNLOAD_DESCRIPTION)
                .arg(uri_arg())
                .arg(Arg::new("ID").required(true).help("File id"))
                .arg(
                    arg!(-o --output <PATH>)
                        .value_parser(value_parser!(PathBuf))
                        .help("Target file or directory, current directory when omitted"),
                ),
        )
        .arg_required_else_help(true)
        .disable_version_flag(true)
}

fn uri_arg() -> Arg {
    arg!(-u --uri <URI>)
        .default_value(DEFAULT_URI)
        .help("Filehub server URI")
}

fn uri(m: &ArgMatches) -> &str {
    m.get_one::<String>("uri").map_or(DEFAULT_URI, String::as_str)
}

fn upload_params(m: &ArgMatches) -> UploadParams {
    UploadParams {
        uri: uri(m).to_owned(),
        file: m.get_one::<PathBuf>("file").cloned().unwrap_or_default(),
        folder: m.get_one::<String>("dir").cloned(),
        force: m.get_flag("force"),
        chunk_size: m
            .get_one::<u64>("chunk-size")
            .copied()
            .unwrap_or(client::CHUNK_SIZE),
        concurrency: m
            .get_one::<u16>("concurrency")
            .map_or(client::CONCURRENCY, |c| usize::from(*c)),
    }
}
