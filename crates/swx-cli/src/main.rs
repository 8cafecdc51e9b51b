use std::path::PathBuf;

use anyhow::Result;
use atty::Stream;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;

use swx_core::commands::backup::{backup_create, backup_delete, backup_list, backup_restore, BackupCreateRequest};
use swx_core::commands::host::{host_start, host_status, host_stop};
use swx_core::commands::license::{license_activate, license_deactivate, license_status, license_verify};
use swx_core::commands::log::log_recent;
use swx_core::commands::profile::{
    profile_add, profile_import, profile_list, profile_remove, profile_show, profile_update,
    ProfileAddRequest, ProfileUpdateRequest,
};
use swx_core::commands::switch::{reset, switch, ResetKind};
use swx_core::{CommandStatus, Config, ExecutionOutcome, ServiceContext};
use swx_domain::SnapshotKind;

mod style;

use style::Style;

fn main() -> Result<()> {
    let cli = SwxCli::parse();
    init_tracing(cli.verbose);

    let config = Config::from_env();
    let ctx = ServiceContext::new(config)?;
    let outcome = dispatch(&ctx, &cli.command)?;
    let code = emit_output(&cli, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = format!("swx={level},swx_core={level},swx_domain={level},swx_cli={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn dispatch(ctx: &ServiceContext, command: &Command) -> Result<ExecutionOutcome> {
    match command {
        Command::Profile(cmd) => match cmd {
            ProfileCommand::List => profile_list(ctx),
            ProfileCommand::Show { selector } => profile_show(ctx, selector),
            ProfileCommand::Add(args) => profile_add(
                ctx,
                &ProfileAddRequest {
                    email: args.email.clone(),
                    access_token: args.token.clone(),
                    refresh_token: args.refresh_token.clone(),
                    display_name: args.name.clone(),
                },
            ),
            ProfileCommand::Update(args) => profile_update(
                ctx,
                &ProfileUpdateRequest {
                    selector: args.selector.clone(),
                    email: args.email.clone(),
                    access_token: args.token.clone(),
                    refresh_token: args.refresh_token.clone(),
                    display_name: args.name.clone(),
                },
            ),
            ProfileCommand::Remove { selector } => profile_remove(ctx, selector),
            ProfileCommand::Import { name } => profile_import(ctx, name.as_deref()),
        },
        Command::Switch { selector } => switch(ctx, selector),
        Command::Reset(cmd) => match cmd {
            ResetCommand::Identity => reset(ctx, ResetKind::Identity),
            ResetCommand::Deep => reset(ctx, ResetKind::Deep),
            ResetCommand::Factory { force } => {
                if *force {
                    reset(ctx, ResetKind::Factory)
                } else {
                    Ok(ExecutionOutcome::user_error(
                        "factory reset is irreversible; pass --force to confirm",
                        serde_json::json!({ "hint": "swx reset factory --force" }),
                    ))
                }
            }
        },
        Command::Backup(cmd) => match cmd {
            BackupCommand::Create(args) => backup_create(
                ctx,
                &BackupCreateRequest {
                    kind: args.kind.into(),
                    owner_email: args.owner.clone(),
                },
            ),
            BackupCommand::List => backup_list(ctx),
            BackupCommand::Restore { path } => backup_restore(ctx, path),
            BackupCommand::Delete { path } => backup_delete(ctx, path),
        },
        Command::License(cmd) => match cmd {
            LicenseCommand::Activate { key, server } => {
                license_activate(ctx, key, server.as_deref())
            }
            LicenseCommand::Verify => license_verify(ctx),
            LicenseCommand::Status => license_status(ctx),
            LicenseCommand::Deactivate => license_deactivate(ctx),
        },
        Command::Host(cmd) => match cmd {
            HostCommand::Status => host_status(ctx),
            HostCommand::Stop => host_stop(ctx),
            HostCommand::Start => host_start(ctx),
        },
        Command::Log { limit } => log_recent(ctx, *limit),
    }
}

fn emit_output(cli: &SwxCli, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = match outcome.status {
        CommandStatus::Ok => 0,
        CommandStatus::UserError => 1,
        CommandStatus::Failure => 2,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(code);
    }
    if cli.quiet {
        return Ok(code);
    }

    let style = Style::new(cli.no_color, atty::is(Stream::Stdout));
    println!("{}", style.status(&outcome.status, &outcome.message));
    for line in detail_lines(&outcome.details) {
        println!("  {line}");
    }
    if let Some(hint) = outcome.details.get("hint").and_then(Value::as_str) {
        println!("{}", style.info(&format!("Hint: {hint}")));
    }
    Ok(code)
}

/// Human-mode rendering of the common detail shapes: string arrays under
/// `details`/`warnings`, nothing else.
fn detail_lines(details: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    for key in ["details", "warnings"] {
        if let Some(values) = details.get(key).and_then(Value::as_array) {
            for value in values {
                if let Some(text) = value.as_str() {
                    lines.push(match key {
                        "warnings" => format!("warning: {text}"),
                        _ => text.to_string(),
                    });
                }
            }
        }
    }
    lines
}

#[derive(Parser, Debug)]
#[command(
    name = "swx",
    author,
    version,
    about = "Credential-profile switcher for a managed desktop host",
    long_about = "Stores credential profiles for the host application and switches between \
them: swaps auth tokens and the device-identity fingerprint while preserving the working \
session, with license activation against a remote server.",
    after_help = "Examples:\n  swx profile add dev@example.com --token <TOKEN>\n  swx switch dev@example.com\n  swx license activate SWX-XXXX-YYYY\n  swx backup create --kind settings"
)]
struct SwxCli {
    #[arg(short, long, help = "Suppress human output (errors still set the exit code)")]
    quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)")]
    verbose: u8,
    #[arg(long, help = "Emit {status,message,details} JSON envelopes")]
    json: bool,
    #[arg(long, help = "Disable colored human output")]
    no_color: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(subcommand, about = "Manage stored credential profiles")]
    Profile(ProfileCommand),
    #[command(
        about = "Switch the host to a stored profile",
        after_help = "Examples:\n  swx switch dev@example.com\n  swx --json switch 4cd3…\n"
    )]
    Switch {
        #[arg(value_name = "PROFILE", help = "Profile id or email")]
        selector: String,
    },
    #[command(subcommand, about = "Reset host identity or state")]
    Reset(ResetCommand),
    #[command(subcommand, about = "Snapshot and restore host session state")]
    Backup(BackupCommand),
    #[command(subcommand, about = "License activation and validation")]
    License(LicenseCommand),
    #[command(subcommand, about = "Inspect or control the host process")]
    Host(HostCommand),
    #[command(about = "Show the operation log")]
    Log {
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    #[command(about = "List stored profiles")]
    List,
    #[command(about = "Show one profile")]
    Show {
        #[arg(value_name = "PROFILE")]
        selector: String,
    },
    #[command(about = "Store a new profile")]
    Add(ProfileAddArgs),
    #[command(about = "Update fields of a stored profile")]
    Update(ProfileUpdateArgs),
    #[command(about = "Delete a stored profile")]
    Remove {
        #[arg(value_name = "PROFILE")]
        selector: String,
    },
    #[command(about = "Import the credential the host is currently signed in with")]
    Import {
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ProfileAddArgs {
    #[arg(value_name = "EMAIL")]
    email: String,
    #[arg(long, value_name = "TOKEN")]
    token: String,
    #[arg(long = "refresh-token", value_name = "TOKEN")]
    refresh_token: Option<String>,
    #[arg(long, help = "Display name shown in listings")]
    name: Option<String>,
}

#[derive(Args, Debug)]
struct ProfileUpdateArgs {
    #[arg(value_name = "PROFILE")]
    selector: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long, value_name = "TOKEN")]
    token: Option<String>,
    #[arg(long = "refresh-token", value_name = "TOKEN")]
    refresh_token: Option<String>,
    #[arg(long)]
    name: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ResetCommand {
    #[command(about = "Regenerate the host's device-identity bundle")]
    Identity,
    #[command(about = "Patch fingerprint derivation in the host's program files")]
    Deep,
    #[command(about = "Irreversibly wipe identity, auth, caches, and session state")]
    Factory {
        #[arg(long, help = "Confirm the irreversible wipe")]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum BackupCommand {
    #[command(about = "Capture a snapshot of host state")]
    Create(BackupCreateArgs),
    #[command(about = "List stored snapshots, newest first")]
    List,
    #[command(about = "Restore a snapshot over the live host state")]
    Restore {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    #[command(about = "Delete a snapshot")]
    Delete {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct BackupCreateArgs {
    #[arg(long, value_enum, default_value_t = KindArg::Complete)]
    kind: KindArg,
    #[arg(long, value_name = "EMAIL", help = "Attribute the snapshot to a profile")]
    owner: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum KindArg {
    Complete,
    Session,
    Settings,
}

impl From<KindArg> for SnapshotKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Complete => SnapshotKind::Complete,
            KindArg::Session => SnapshotKind::Session,
            KindArg::Settings => SnapshotKind::Settings,
        }
    }
}

#[derive(Subcommand, Debug)]
enum LicenseCommand {
    #[command(about = "Activate a license key and seed profiles from its tokens")]
    Activate {
        #[arg(value_name = "KEY")]
        key: String,
        #[arg(long, value_name = "URL", help = "Activation server base URL")]
        server: Option<String>,
    },
    #[command(about = "Re-validate the key online (offline receipt as fallback)")]
    Verify,
    #[command(about = "Evaluate the cached receipt without touching the network")]
    Status,
    #[command(about = "Unbind this device and clear local license state")]
    Deactivate,
}

#[derive(Subcommand, Debug)]
enum HostCommand {
    #[command(about = "Report whether the host is running")]
    Status,
    #[command(about = "Terminate the host (cooperative, then forced)")]
    Stop,
    #[command(about = "Launch the host detached")]
    Start,
}
