use clap::{Parser, Subcommand};
use fsmux::FileServiceConfig;
use fsmux::demo::{DemoOptions, run_demo};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fsmux")]
#[command(about = "Scheme-routed virtual file system layer", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: FileServiceConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the end-to-end demo against in-memory providers")]
    Demo {
        #[arg(long, default_value = "mem")]
        scheme: String,
        #[arg(long, default_value_t = 4096)]
        chunk_size: usize,
        #[arg(long, default_value_t = 6)]
        chunks: usize,
        /// Bytes accepted per provider write, 0 for unlimited
        #[arg(long, default_value_t = 1000)]
        max_write_len: usize,
        #[arg(long, default_value_t = 8)]
        writers: usize,
    },
    #[command(about = "Print the effective configuration")]
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config;
    config.validate()?;

    match cli.command {
        Commands::Demo {
            scheme,
            chunk_size,
            chunks,
            max_write_len,
            writers,
        } => {
            let opts = DemoOptions {
                scheme,
                chunk_size,
                chunks,
                max_write_len,
                writers,
            };
            run_demo(config, opts).await?;
            println!("demo: OK");
        }
        Commands::Config => println!("{config:#?}"),
    }
    Ok(())
}
