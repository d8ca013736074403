use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

use nsrun::connection::{Connection, ConnectionConfig, ExecRequest};
use nsrun::escalate::BecomeConfig;

#[derive(Parser)]
#[command(name = "nsrun")]
#[command(about = "Run commands inside systemd-machined containers via nsenter", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command inside a machine
    Exec {
        /// Machine name as known to machinectl
        machine: String,

        /// Command line; may contain &&, || and ;
        command: String,

        /// Escalate with sudo (password taken from NSRUN_BECOME_PASS)
        #[arg(long)]
        sudo: bool,

        /// User to become when escalating (default: root)
        #[arg(long)]
        become_user: Option<String>,

        /// Interpreter for the command
        #[arg(long, default_value = "/bin/sh")]
        executable: String,

        /// Seconds to wait for a password prompt
        #[arg(long, default_value_t = 10)]
        timeout: u64,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Copy a local file into a machine's root filesystem
    Put {
        machine: String,
        src: PathBuf,
        /// Destination path relative to the machine's root
        dest: String,
    },

    /// Copy a file out of a machine's root filesystem
    Fetch {
        machine: String,
        /// Source path relative to the machine's root
        src: String,
        /// Existing local file to overwrite
        dest: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Exec {
            machine,
            command,
            sudo,
            become_user,
            executable,
            timeout,
            json,
        } => {
            let become_config = sudo.then(|| BecomeConfig {
                user: become_user.clone().unwrap_or_else(|| "root".to_string()),
                password: std::env::var("NSRUN_BECOME_PASS").ok(),
                ..BecomeConfig::default()
            });
            let config = ConnectionConfig {
                basedir: std::env::current_dir().context("cannot resolve working directory")?,
                timeout: Duration::from_secs(timeout),
                become_config,
            };
            let connection = Connection::new(&machine, config)
                .with_context(|| format!("failed to open nsenter connection to {machine}"))?;

            let mut request = ExecRequest::new(command);
            request.sudoable = sudo;
            request.become_user = become_user;
            request.executable = Some(executable);

            let result = connection.connect().execute_command(&request)?;
            connection.close();

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", result.stdout);
                eprint!("{}", result.stderr);
                let status = format!("exit {}", result.exit_code);
                if result.exit_code == 0 {
                    eprintln!("{}", status.green());
                } else {
                    eprintln!("{}", status.red());
                }
            }
            std::process::exit(result.exit_code);
        }

        Commands::Put { machine, src, dest } => {
            let connection = Connection::new(&machine, ConnectionConfig::default())
                .with_context(|| format!("failed to open nsenter connection to {machine}"))?;
            connection.put_file(&src, &dest)?;
            println!("{} {} -> {}:{}", "put".green(), src.display(), machine, dest);
        }

        Commands::Fetch { machine, src, dest } => {
            let connection = Connection::new(&machine, ConnectionConfig::default())
                .with_context(|| format!("failed to open nsenter connection to {machine}"))?;
            connection.fetch_file(&src, &dest)?;
            println!(
                "{} {}:{} -> {}",
                "fetched".green(),
                machine,
                src,
                dest.display()
            );
        }
    }
    Ok(())
}
