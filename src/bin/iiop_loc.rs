use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use iiopwire::codeset::CodeSetService;
use iiopwire::ior::{AddressProfile, AddressResolver};
use iiopwire::message::{LocateReply, LocateRequest};
use iiopwire::network::{CallId, ConnectionManager, TcpTransportFactory};
use iiopwire::protocol::Endian;
use iiopwire::service::{setup_local_tracing, setup_tracing};
use iiopwire::{AppError, AppResult, TransportConfig};
use tokio::runtime;
use tracing::info;

#[derive(Parser)]
#[command(version, about = "resolve and probe iiop locators")]
pub struct CommandLine {
    /// path to config file, defaults to ./conf.toml when present
    #[arg(short, long)]
    pub conf: Option<String>,
    /// write logs to hourly rolling files in this directory as well
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Parser)]
pub enum Command {
    /// print the profiles a locator resolves to
    Resolve { locator: String },
    /// send a LocateRequest to the first profile of a locator
    Locate { locator: String },
    PrintConfig,
}

fn main() -> AppResult<()> {
    dotenv().ok();
    let commandline = CommandLine::parse();
    if commandline.verbose > 0 && std::env::var_os("RUST_LOG").is_none() {
        let level = match commandline.verbose {
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }
    let _log_guard = match &commandline.log_dir {
        Some(log_dir) => Some(setup_tracing(log_dir)?),
        None => {
            setup_local_tracing()?;
            None
        }
    };

    let config = load_config(commandline.conf.as_deref())?;
    match commandline.command {
        Command::PrintConfig => {
            println!("{:#?}", config);
            Ok(())
        }
        Command::Resolve { locator } => {
            let code_sets = CodeSetService::new(&config.code_set);
            let resolver = AddressResolver::from_config(&config, &code_sets)?;
            for profile in resolver.resolve_all(&locator)? {
                print_profile(&profile)?;
            }
            Ok(())
        }
        Command::Locate { locator } => {
            let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
            rt.block_on(locate(&config, &locator))
        }
    }
}

fn load_config(conf: Option<&str>) -> AppResult<TransportConfig> {
    match conf {
        Some(path) => TransportConfig::set_up_config(path),
        None => {
            let default_path = PathBuf::from("./conf.toml");
            if default_path.exists() {
                TransportConfig::set_up_config(default_path)
            } else {
                Ok(TransportConfig::default())
            }
        }
    }
}

fn print_profile(profile: &AddressProfile) -> AppResult<()> {
    println!("{}", profile.channel_uri()?);
    println!("  version:    {}", profile.version);
    println!("  host:       {}", profile.host);
    println!("  port:       {}", profile.port);
    println!("  object key: {}", profile.object_uri());
    for component in &profile.components {
        println!(
            "  component:  tag {} ({} bytes)",
            component.tag,
            component.data.len()
        );
    }
    Ok(())
}

async fn locate(config: &TransportConfig, locator: &str) -> AppResult<()> {
    let code_sets = Arc::new(CodeSetService::new(&config.code_set));
    let resolver = AddressResolver::from_config(config, &code_sets)?;
    let profile = resolver
        .resolve_all(locator)?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::InvalidReference(format!("{} names no address", locator)))?;

    let manager = Arc::new(ConnectionManager::new(
        TcpTransportFactory::from_config(config),
        config.connection.clone(),
        code_sets,
        config.general.fragment_size,
    ));
    manager.start();

    let call = CallId::next();
    let result = probe(&manager, call, &profile).await;
    if manager.allocated_count() > 0 {
        manager.release_connection_for(call).await?;
    }
    manager.stop().await;
    let reply = result?;
    println!("{}: {:?}", profile.channel_uri()?, reply.status);
    Ok(())
}

async fn probe(
    manager: &ConnectionManager<TcpTransportFactory>,
    call: CallId,
    profile: &AddressProfile,
) -> AppResult<LocateReply> {
    let connection = manager.allocate_connection_for(call, profile).await?;
    let request_id = manager.generate_request_id(call)?;
    let request = LocateRequest::new(request_id, profile.object_key.clone());
    connection
        .send_message(request.to_message(profile.version, Endian::native())?)
        .await?;
    info!("sent locate request {} to {}", request_id, connection.key());

    let message = connection.receive_message().await?.ok_or_else(|| {
        AppError::TransportFailure(format!("{} closed before replying", connection.key()))
    })?;
    let reply = LocateReply::read_from(&message.header, message.body())?;
    if reply.request_id != request_id {
        return Err(AppError::MalformedProtocol(format!(
            "locate reply for request {}, expected {}",
            reply.request_id, request_id
        )));
    }
    Ok(reply)
}
