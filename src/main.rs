use anyhow::Result;
use log::*;

#[derive(structopt::StructOpt)]
#[structopt()]
struct Args {
    /// Silence all output
    #[structopt(short = "q", long = "quiet")]
    quiet: bool,
    /// Verbose mode (-v, -vv, -vvv, etc)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: usize,
    /// Timestamp (sec, ms, ns, none)
    #[structopt(short = "t", long = "timestamp")]
    ts: Option<stderrlog::Timestamp>,
    /// Appcast URL to check instead of the production feed
    url: Option<String>,
}

/// Map CHECK_UPSTREAM_LOG_LEVEL onto a stderrlog verbosity. Unset or
/// unrecognized values mean warnings and above.
fn env_verbosity() -> usize {
    let level = match std::env::var("CHECK_UPSTREAM_LOG_LEVEL") {
        Ok(value) => value,
        Err(_) => return 1,
    };
    match level.trim().to_ascii_lowercase().as_str() {
        "error" => 0,
        "warn" | "warning" => 1,
        "info" => 2,
        "debug" => 3,
        "trace" => 4,
        _ => 1,
    }
}

#[paw::main]
fn main(args: Args) -> Result<()> {
    // -v flags win; the environment variable only supplies the default.
    let verbosity = if args.verbose > 0 {
        args.verbose
    } else {
        env_verbosity()
    };
    stderrlog::new()
        .module(module_path!())
        .module("ureq")
        .quiet(args.quiet)
        .verbosity(verbosity)
        .timestamp(args.ts.unwrap_or(stderrlog::Timestamp::Off))
        .init()
        .unwrap();

    let record = check_upstream::run(args.url.as_deref())?;
    debug!("Resolved release: {:?}", record);
    println!("{}", serde_json::to_string(&record)?);
    Ok(())
}
