mod config;
mod face;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Config;
use difs_core::{
    DeleteFileOperation, DeleteFileOperationOutcome, DeleteFileOperationRequest, GetFileOperation,
    GetFileOperationOutcome, GetFileOperationRequest, Name, PutFileOperation,
    PutFileOperationRequest, PutOptions, SigningMode, Transport,
};
use face::HttpFace;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "difs")]
#[command(about = "Store, fetch and delete files on DIFS repos")]
struct Cli {
    /// Config file (YAML, TOML or JSON)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Interest lifetime in milliseconds
    #[arg(short = 'l', long = "lifetime")]
    lifetime_ms: Option<u64>,

    /// Abort the whole command after this many milliseconds
    #[arg(short = 'w', long = "timeout")]
    timeout_ms: Option<u64>,

    /// Command prefix of the repo, e.g. /example/repo
    repo_prefix: String,

    /// File name, e.g. /photos/cat.jpg
    name: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch a file
    Get {
        #[command(flatten)]
        common: CommonArgs,

        /// Write to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Insert a file into a repo
    Put {
        #[command(flatten)]
        common: CommonArgs,

        /// Segment size in bytes
        #[arg(short = 's', long)]
        block_size: Option<usize>,

        /// Freshness period of segments in milliseconds
        #[arg(short = 'x', long = "freshness")]
        freshness_ms: Option<u64>,

        /// Sign segments with a SHA-256 digest only
        #[arg(short = 'D', long)]
        digest: bool,

        /// Identity signing segments and the manifest
        #[arg(short = 'i', long)]
        identity: Option<String>,

        /// Identity signing insert commands
        #[arg(short = 'I', long)]
        command_identity: Option<String>,

        /// Address the repo pulls segments from
        #[arg(long)]
        listen: Option<String>,

        /// URL announced to the forwarder for the listen address
        #[arg(long)]
        advertise: Option<String>,

        /// File to insert
        file: PathBuf,
    },
    /// Delete a file from a repo
    Delete {
        #[command(flatten)]
        common: CommonArgs,
    },
}

impl Commands {
    fn common(&self) -> &CommonArgs {
        match self {
            Commands::Get { common, .. } => common,
            Commands::Put { common, .. } => common,
            Commands::Delete { common } => common,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            std::process::exit(usage_exit_code(&error));
        }
    };
    init_tracing(cli.command.common().verbose);

    if let Err(error) = run(cli).await {
        tracing::error!("{:#}", error);
        std::process::exit(1);
    }
}

/// Help and version output succeed; every other parse failure is a usage
/// error.
fn usage_exit_code(error: &clap::Error) -> i32 {
    if error.use_stderr() { 1 } else { 0 }
}

/// A wait of 0 ms means no limit.
fn wait_limit(timeout_ms: Option<u64>) -> Option<Duration> {
    timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "difs=debug,difs_core=debug"
    } else {
        "difs=info,difs_core=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    let common = cli.command.common().clone();
    if let Some(lifetime_ms) = common.lifetime_ms {
        config.interest_lifetime_ms = lifetime_ms;
    }
    let repo_prefix = Name::from_uri(&common.repo_prefix)
        .with_context(|| format!("invalid repo prefix {}", common.repo_prefix))?;
    let name = Name::from_uri(&common.name).with_context(|| format!("invalid name {}", common.name))?;
    let timeout = wait_limit(common.timeout_ms);

    match cli.command {
        Commands::Get { output, .. } => {
            with_timeout(timeout, get_file(&config, name, repo_prefix, output)).await
        }
        Commands::Delete { .. } => {
            with_timeout(timeout, delete_file(&config, name, repo_prefix)).await
        }
        Commands::Put {
            block_size,
            freshness_ms,
            digest,
            identity,
            command_identity,
            listen,
            advertise,
            file,
            ..
        } => {
            if let Some(block_size) = block_size {
                config.block_size = block_size;
            }
            if let Some(freshness_ms) = freshness_ms {
                config.freshness_period_ms = freshness_ms;
            }
            if identity.is_some() {
                config.identity_for_data = identity;
            }
            if command_identity.is_some() {
                config.identity_for_command = command_identity;
            }
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            if advertise.is_some() {
                config.advertise_url = advertise;
            }
            // the put enforces its own deadline while the repo confirms
            put_file(&config, name, repo_prefix, file, digest, timeout).await
        }
    }
}

async fn with_timeout<F>(timeout: Option<Duration>, command: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, command)
            .await
            .map_err(|_| anyhow!("timed out after {} ms", timeout.as_millis()))?,
        None => command.await,
    }
}

fn face(config: &Config) -> Arc<dyn Transport> {
    Arc::new(HttpFace::new(
        config.forwarder_url.clone(),
        config.listen_addr.clone(),
        config.advertise_url.clone(),
    ))
}

async fn get_file(config: &Config, name: Name, repo_prefix: Name, output: Option<PathBuf>) -> Result<()> {
    let operation = GetFileOperation::new(face(config), Arc::new(config.keychain()?));
    let mut request = GetFileOperationRequest::new(name.clone(), repo_prefix.clone());
    request.interest_lifetime = config.interest_lifetime();
    request.signing_mode = SigningMode::from_identity(config.identity_for_command.as_deref());

    let outcome = match output {
        Some(path) => {
            let mut file = tokio::fs::File::create(&path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
            fetch_into(&operation, request, &mut file).await?
        }
        None => fetch_into(&operation, request, &mut tokio::io::stdout()).await?,
    };

    match outcome {
        GetFileOperationOutcome::Fetched(summary) => {
            tracing::info!(
                "fetched {} from {}: {} segments, {} bytes",
                name,
                repo_prefix,
                summary.segments,
                summary.bytes
            );
        }
        GetFileOperationOutcome::NotFound => {
            eprintln!("{} not found in {}", name, repo_prefix);
        }
    }
    Ok(())
}

async fn fetch_into<W>(
    operation: &GetFileOperation,
    request: GetFileOperationRequest,
    sink: &mut W,
) -> Result<GetFileOperationOutcome>
where
    W: AsyncWrite + Unpin + Send,
{
    let name = request.name.clone();
    let outcome = operation
        .run(request, sink)
        .await
        .with_context(|| format!("failed to get {}", name))?;
    sink.flush().await?;
    Ok(outcome)
}

async fn put_file(
    config: &Config,
    name: Name,
    repo_prefix: Name,
    path: PathBuf,
    digest: bool,
    timeout: Option<Duration>,
) -> Result<()> {
    let input = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;

    let signing_mode = if digest {
        SigningMode::DigestSha256
    } else {
        SigningMode::from_identity(config.identity_for_data.as_deref())
    };
    let options = PutOptions {
        block_size: config.block_size,
        freshness_period: Duration::from_millis(config.freshness_period_ms),
        interest_lifetime: config.interest_lifetime(),
        check_period: Duration::from_millis(config.check_period_ms),
        signing_mode,
        identity_for_command: config.identity_for_command.clone(),
        timeout,
    };

    let operation = PutFileOperation::new(face(config), Arc::new(config.keychain()?));
    let result = operation
        .run(PutFileOperationRequest {
            name: name.clone(),
            repo_prefix: repo_prefix.clone(),
            input,
            options,
        })
        .await
        .with_context(|| format!("failed to put {} into {}", path.display(), repo_prefix))?;

    tracing::info!(
        "inserted {} as {}: {} segments, {} bytes, process {}",
        path.display(),
        name,
        result.segments,
        result.bytes,
        result.process_id
    );
    Ok(())
}

async fn delete_file(config: &Config, name: Name, repo_prefix: Name) -> Result<()> {
    let operation = DeleteFileOperation::new(face(config), Arc::new(config.keychain()?));
    let mut request = DeleteFileOperationRequest::new(name.clone(), repo_prefix.clone());
    request.interest_lifetime = config.interest_lifetime();
    request.signing_mode = SigningMode::from_identity(config.identity_for_command.as_deref());

    match operation
        .run(request)
        .await
        .with_context(|| format!("failed to delete {}", name))?
    {
        DeleteFileOperationOutcome::Deleted => tracing::info!("deleted {} from {}", name, repo_prefix),
        DeleteFileOperationOutcome::NotFound => eprintln!("{} not found in {}", name, repo_prefix),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_put_arguments() {
        let cli = Cli::try_parse_from([
            "difs", "put", "-D", "-s", "4096", "-l", "2000", "--listen", "0.0.0.0:7000", "/repo",
            "/files/a", "a.bin",
        ])
        .unwrap();
        assert_eq!(cli.command.common().lifetime_ms, Some(2000));
        let Commands::Put {
            common,
            block_size,
            digest,
            listen,
            file,
            ..
        } = cli.command
        else {
            panic!("expected put");
        };
        assert_eq!(common.repo_prefix, "/repo");
        assert_eq!(common.name, "/files/a");
        assert_eq!(block_size, Some(4096));
        assert!(digest);
        assert_eq!(listen.as_deref(), Some("0.0.0.0:7000"));
        assert_eq!(file, PathBuf::from("a.bin"));
    }

    #[test]
    fn test_get_and_delete_arguments() {
        let cli = Cli::try_parse_from(["difs", "--config", "difs.yaml", "get", "-v", "-o", "out.bin", "/repo", "/f"])
            .unwrap();
        assert_eq!(cli.config.as_deref(), Some("difs.yaml"));
        assert!(cli.command.common().verbose);
        assert!(matches!(cli.command, Commands::Get { output: Some(_), .. }));

        let cli = Cli::try_parse_from(["difs", "delete", "-w", "500", "/repo", "/f"]).unwrap();
        assert_eq!(cli.command.common().timeout_ms, Some(500));

        assert!(Cli::try_parse_from(["difs", "put", "/repo", "/f"]).is_err());
    }

    #[test]
    fn test_usage_errors_exit_with_one() {
        let missing = Cli::try_parse_from(["difs", "put", "/repo"]).unwrap_err();
        assert_eq!(usage_exit_code(&missing), 1);

        let unknown = Cli::try_parse_from(["difs", "get", "--bogus", "/repo", "/f"]).unwrap_err();
        assert_eq!(usage_exit_code(&unknown), 1);

        let help = Cli::try_parse_from(["difs", "--help"]).unwrap_err();
        assert_eq!(usage_exit_code(&help), 0);
    }

    #[test]
    fn test_zero_wait_means_no_limit() {
        assert_eq!(wait_limit(Some(0)), None);
        assert_eq!(wait_limit(None), None);
        assert_eq!(wait_limit(Some(250)), Some(Duration::from_millis(250)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_aborts_slow_commands() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        };
        let err = with_timeout(Some(Duration::from_millis(50)), slow).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));

        assert!(with_timeout(None, async { Ok(()) }).await.is_ok());
    }
}
