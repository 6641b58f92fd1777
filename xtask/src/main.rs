use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for terrastream")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fmt, clippy, tests and the CLI smoke run
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates, warnings denied
    Clippy,
    /// Run all tests
    Test,
    /// Run the terrain field update bench (release)
    Bench,
    /// Build rustdoc for the workspace
    Doc,
    /// Fly and probe with the CLI to exercise the full pipeline
    Smoke,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            fmt()?;
            clippy()?;
            test()?;
            smoke()?;
        }
        Commands::Fmt => fmt()?,
        Commands::Clippy => clippy()?,
        Commands::Test => test()?,
        Commands::Bench => cargo(
            "bench",
            &[
                "bench",
                "-p",
                "terrastream-stream",
                "--bench",
                "bench_field_update",
            ],
        )?,
        Commands::Doc => cargo("doc", &["doc", "--workspace", "--no-deps"])?,
        Commands::Smoke => smoke()?,
    }

    Ok(())
}

fn fmt() -> Result<()> {
    cargo("fmt --check", &["fmt", "--all", "--", "--check"])
}

fn clippy() -> Result<()> {
    cargo(
        "clippy",
        &[
            "clippy",
            "--workspace",
            "--all-targets",
            "--",
            "-D",
            "warnings",
        ],
    )
}

fn test() -> Result<()> {
    cargo("test", &["test", "--workspace"])
}

fn smoke() -> Result<()> {
    let cli = ["run", "-q", "-p", "terrastream-cli", "--"];
    let fly = [
        "fly",
        "--frames",
        "120",
        "--speed",
        "60",
        "--terrain",
        "synthetic",
        "--every",
        "40",
    ];
    cargo("smoke fly", &[&cli[..], &fly[..]].concat())?;
    let probe = ["probe", "1234", "-567", "--terrain", "hills"];
    cargo("smoke probe", &[&cli[..], &probe[..]].concat())
}

fn cargo(step: &str, args: &[&str]) -> Result<()> {
    println!("==> cargo {step}");
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("cargo {step} failed ({status})");
    }
    Ok(())
}
