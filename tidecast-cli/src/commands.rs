//! CLI command implementations

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Subcommand};
use tidecast_core::classify::{PlayTarget, classify, sendtokodi_target};
use tidecast_core::network::local_ip_towards;
use tidecast_core::readiness::PathProbe;
use tidecast_core::{
    CastConfig, CastError, ControllerRpc, FeedSlot, FileSource, HttpController, InterruptPolicy,
    LivePipeline, LiveSource, MediaRequest, OriginAddress, PlaybackSession, ReadinessError,
    SessionOutcome, StreamReadyDetector, spawn_live_pipeline,
};
use tidecast_web::{OriginContent, OriginServer};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Time the origin server gets to finish in-flight responses.
const SERVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type ServerTask = JoinHandle<Result<(), CastError>>;
type ProducerTask = JoinHandle<Result<u64, CastError>>;

/// Flags that override configuration values.
#[derive(Debug, Default, Args)]
pub struct Overrides {
    /// Controller host or IP address
    #[arg(short, long, global = true)]
    pub target: Option<String>,

    /// Controller JSON-RPC port
    #[arg(long, global = true)]
    pub target_port: Option<u16>,

    /// Controller username
    #[arg(long, global = true)]
    pub login: Option<String>,

    /// Controller password
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Local port of the origin server (0 picks a free port)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Host announced to the controller instead of the detected address
    #[arg(long, global = true)]
    pub advertise_host: Option<String>,
}

impl Overrides {
    fn apply(&self, config: &mut CastConfig) {
        if let Some(target) = &self.target {
            config.controller.host = target.clone();
        }
        if let Some(port) = self.target_port {
            config.controller.port = port;
        }
        if let Some(login) = &self.login {
            config.controller.username = Some(login.clone());
        }
        if let Some(password) = &self.password {
            config.controller.password = Some(password.clone());
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = &self.advertise_host {
            config.server.advertise_host = Some(host.clone());
        }
    }
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Play a local file, a YouTube link or any URL on the controller
    Play {
        /// File path or URL
        input: String,
        /// Resolve the URL with the SendToKodi add-on
        #[arg(long)]
        sendtokodi: bool,
        /// Stop controller playback when interrupted
        #[arg(long)]
        stop_on_exit: bool,
    },
    /// Stream standard input to the controller
    Stdin {
        /// Logical name announced in the stream URL ("-" for none)
        #[arg(long)]
        name: Option<String>,
        /// Only serve the stream; never contact the controller
        #[arg(long)]
        no_controller: bool,
        /// Stop controller playback when interrupted
        #[arg(long)]
        stop_on_exit: bool,
    },
    /// Show active players on the controller
    Status,
    /// Stop every active player on the controller
    Stop,
    /// Print an example configuration file
    ConfigExample,
}

/// Handle the CLI command
///
/// # Errors
/// - `CastError` - Configuration, controller, source or transport failure
pub async fn handle_command(
    command: Commands,
    config_file: Option<&Path>,
    overrides: &Overrides,
) -> anyhow::Result<()> {
    if matches!(command, Commands::ConfigExample) {
        print!("{}", CastConfig::example());
        return Ok(());
    }

    let mut config = CastConfig::load(config_file)?;
    overrides.apply(&mut config);

    match command {
        Commands::Play {
            input,
            sendtokodi,
            stop_on_exit,
        } => {
            config.validate()?;
            play(&config, &input, sendtokodi, stop_on_exit).await
        }
        Commands::Stdin {
            name,
            no_controller,
            stop_on_exit,
        } => {
            if !no_controller {
                config.validate()?;
            }
            stream_stdin(&config, name, no_controller, interrupt_policy(stop_on_exit)).await
        }
        Commands::Status => {
            config.validate()?;
            show_status(&config).await
        }
        Commands::Stop => {
            config.validate()?;
            stop_players(&config).await
        }
        Commands::ConfigExample => Ok(()),
    }
}

/// Classifies `input` and plays it directly or through the origin server
///
/// # Errors
/// - `CastError::Configuration` - `--sendtokodi` with something other than an http(s) URL
/// - `CastError` - Any failure while streaming or playing
pub async fn play(
    config: &CastConfig,
    input: &str,
    sendtokodi: bool,
    stop_on_exit: bool,
) -> anyhow::Result<()> {
    let target = if sendtokodi {
        sendtokodi_target(input)?
    } else {
        classify(input)
    };
    debug!(?target, "Classified input");

    match target {
        PlayTarget::LocalFile(path) => {
            stream_file(config, &path, interrupt_policy(stop_on_exit)).await
        }
        other => {
            let Some(uri) = other.direct_uri() else {
                anyhow::bail!("{input} cannot be played directly");
            };
            play_direct(config, uri).await
        }
    }
}

/// Serves a local file and follows controller playback to its end
///
/// # Errors
/// - `CastError::StreamSource` - File missing or unreadable
/// - `CastError::ControllerUnreachable` - Health check, open or polling failed
/// - `CastError::Transport` - Origin server could not bind
pub async fn stream_file(
    config: &CastConfig,
    path: &Path,
    policy: InterruptPolicy,
) -> anyhow::Result<()> {
    let shutdown = shutdown_on_ctrl_c();
    let source = FileSource::open(path).await?;
    let Some(controller) = unless_interrupted(&shutdown, connect_controller(config))
        .await
        .transpose()?
    else {
        return Ok(());
    };

    let server = OriginServer::bind(&config.server).await?;
    let port = server.local_addr().port();
    let request = MediaRequest::file(source.path(), port);
    let host = origin_host(config, &server).await?;
    let origin = OriginAddress::for_request(&request, &host, port, &config.server);
    info!(%origin, size = source.len(), "Serving file");

    let server_cancel = CancellationToken::new();
    let mut server_task = Some(tokio::spawn(
        server.serve(OriginContent::File(source), server_cancel.clone()),
    ));

    let mut session = PlaybackSession::new(
        controller,
        origin.as_str(),
        config.controller.poll_interval(),
        policy,
    );
    let result = supervise(
        &mut session,
        &config.controller.endpoint(),
        &mut server_task,
        &mut None,
        &shutdown,
    )
    .await;

    stop_server(server_cancel, server_task).await;
    result
}

/// Streams standard input, gated on the source producing data
///
/// # Errors
/// - `CastError::StreamSource` - Standard input failed or readiness timed out
/// - `CastError::ControllerUnreachable` - Health check, open or polling failed
/// - `CastError::Transport` - Origin server could not bind
pub async fn stream_stdin(
    config: &CastConfig,
    name: Option<String>,
    no_controller: bool,
    policy: InterruptPolicy,
) -> anyhow::Result<()> {
    let shutdown = shutdown_on_ctrl_c();
    let controller = if no_controller {
        None
    } else {
        match unless_interrupted(&shutdown, connect_controller(config)).await {
            Some(connected) => Some(connected?),
            None => return Ok(()),
        }
    };

    let server = OriginServer::bind(&config.server).await?;
    let port = server.local_addr().port();
    let name = name.unwrap_or_else(|| config.stream.stream_name.clone());
    let request = MediaRequest::live(name, port);
    let host = origin_host(config, &server).await?;
    let origin = OriginAddress::for_request(&request, &host, port, &config.server);

    let (reader, metadata_path) = LiveSource::stdin().into_parts();
    let pipeline_cancel = CancellationToken::new();
    let LivePipeline { feed, producer } = spawn_live_pipeline(
        reader,
        config.stream.chunk_size,
        config.stream.buffer_chunks,
        pipeline_cancel.clone(),
    );
    let mut producer = Some(producer);

    let server_cancel = CancellationToken::new();
    let content = OriginContent::Live {
        feed: FeedSlot::new(feed),
        route: origin.route().to_string(),
    };
    let mut server_task = Some(tokio::spawn(
        server.serve(content, server_cancel.clone()),
    ));
    info!(%origin, "Serving live stream");

    let result = match controller {
        None => serve_unattended(&mut server_task, &mut producer, &shutdown).await,
        Some(controller) => {
            let readiness = wait_for_source(config, metadata_path.as_deref(), &shutdown);
            match gate_on_source(readiness, &mut server_task, &mut producer).await {
                Ok(true) => {
                    let mut session = PlaybackSession::new(
                        controller,
                        origin.as_str(),
                        config.controller.poll_interval(),
                        policy,
                    );
                    supervise(
                        &mut session,
                        &config.controller.endpoint(),
                        &mut server_task,
                        &mut producer,
                        &shutdown,
                    )
                    .await
                }
                Ok(false) => Ok(()),
                Err(e) => Err(e),
            }
        }
    };

    pipeline_cancel.cancel();
    stop_server(server_cancel, server_task).await;
    if let Some(producer) = producer {
        producer.abort();
    }
    result
}

/// Asks the controller to play a URI itself
///
/// # Errors
/// - `CastError::ControllerUnreachable` - Health check, open or polling failed
pub async fn play_direct(config: &CastConfig, uri: String) -> anyhow::Result<()> {
    let shutdown = shutdown_on_ctrl_c();
    let Some(controller) = unless_interrupted(&shutdown, connect_controller(config))
        .await
        .transpose()?
    else {
        return Ok(());
    };
    info!(%uri, "Playing directly on controller");

    let mut session = PlaybackSession::new(
        controller,
        uri,
        config.controller.poll_interval(),
        InterruptPolicy::StopPlayer,
    );
    supervise(
        &mut session,
        &config.controller.endpoint(),
        &mut None,
        &mut None,
        &shutdown,
    )
    .await
}

/// Print active players
///
/// # Errors
/// - `CastError::ControllerUnreachable` - Status query failed
pub async fn show_status(config: &CastConfig) -> anyhow::Result<()> {
    let controller = connect_controller(config).await?;
    let status = controller
        .active_players()
        .await
        .map_err(CastError::from)?;

    if status.is_idle() {
        println!("No active players on {}", controller.endpoint());
    } else {
        println!("Active players on {}:", controller.endpoint());
        for player in &status.active_players {
            println!("  Player {}: {}", player.playerid, player.kind);
        }
    }
    Ok(())
}

/// Stop all active players
///
/// # Errors
/// - `CastError::ControllerUnreachable` - Status query or stop call failed
pub async fn stop_players(config: &CastConfig) -> anyhow::Result<()> {
    let controller = connect_controller(config).await?;
    let stopped = controller.stop_all().await.map_err(CastError::from)?;
    println!("Stopped {stopped} player(s)");
    Ok(())
}

fn interrupt_policy(stop_on_exit: bool) -> InterruptPolicy {
    if stop_on_exit {
        InterruptPolicy::StopPlayer
    } else {
        InterruptPolicy::Detach
    }
}

/// Creates the controller client and checks that it answers.
async fn connect_controller(config: &CastConfig) -> Result<Arc<HttpController>, CastError> {
    let controller = HttpController::new(&config.controller)?;
    let version = controller.version().await?;
    debug!(%version, endpoint = controller.endpoint(), "Controller reachable");
    Ok(Arc::new(controller))
}

/// Host placed in the origin address.
async fn origin_host(config: &CastConfig, server: &OriginServer) -> Result<String, CastError> {
    if let Some(host) = &config.server.advertise_host {
        return Ok(host.clone());
    }
    if config.controller.host.trim().is_empty() {
        return Ok(server.local_addr().ip().to_string());
    }
    let ip = local_ip_towards(&config.controller.host, config.controller.port).await?;
    Ok(ip.to_string())
}

/// Waits for the live source to produce data. `Ok(false)` means interrupted.
async fn wait_for_source(
    config: &CastConfig,
    metadata_path: Option<&Path>,
    shutdown: &CancellationToken,
) -> Result<bool, CastError> {
    let Some(path) = metadata_path else {
        warn!("Live source has no metadata path; announcing without readiness check");
        return Ok(true);
    };

    if is_regular_file(path).await {
        debug!(path = %path.display(), "Live source is a regular file; data already present");
        return Ok(true);
    }

    let detector = StreamReadyDetector::from_config(&config.stream);

    info!("Waiting for live source to produce data");
    match detector
        .wait_ready(&PathProbe::new(path.to_path_buf()), shutdown)
        .await
    {
        Ok(_) => Ok(true),
        Err(ReadinessError::Cancelled) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Runs `readiness` while watching the server and producer tasks, so a
/// failure of either ends the wait. A producer that reaches end-of-input
/// first counts as ready.
async fn gate_on_source(
    readiness: impl Future<Output = Result<bool, CastError>>,
    server: &mut Option<ServerTask>,
    producer: &mut Option<ProducerTask>,
) -> anyhow::Result<bool> {
    tokio::select! {
        ready = readiness => Ok(ready?),
        result = join_task(&mut *server) => Err(server_exit_error(result).into()),
        result = join_task(&mut *producer) => {
            let total = producer_result(result)?;
            info!(total, "Live source ended before readiness was observed");
            Ok(true)
        }
    }
}

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false)
}

/// Opens the session and waits for completion, interruption or a fatal
/// background failure.
async fn supervise(
    session: &mut PlaybackSession,
    endpoint: &str,
    server: &mut Option<ServerTask>,
    producer: &mut Option<ProducerTask>,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    match unless_interrupted(shutdown, session.open()).await {
        Some(opened) => opened?,
        None => {
            let outcome = session.terminate().await?;
            info!(?outcome, "Interrupted before the controller answered");
            return Ok(());
        }
    }
    let mut completion = session.completion();

    loop {
        tokio::select! {
            outcome = completion.wait() => {
                return match outcome {
                    SessionOutcome::Completed => {
                        info!("Playback finished");
                        Ok(())
                    }
                    SessionOutcome::Terminated => Ok(()),
                    SessionOutcome::Failed(reason) => Err(CastError::ControllerUnreachable {
                        endpoint: endpoint.to_string(),
                        reason,
                    }
                    .into()),
                };
            }
            _ = shutdown.cancelled() => {
                let outcome = session
                    .terminate()
                    .await
                    .context("failed to stop controller playback")?;
                info!(?outcome, "Interrupted");
                return Ok(());
            }
            result = join_task(&mut *server) => {
                session.terminate().await.ok();
                return Err(server_exit_error(result).into());
            }
            result = join_task(&mut *producer) => {
                let total = producer_result(result)?;
                info!(total, "Live source ended");
            }
        }
    }
}

/// Serves the live stream without a controller until the source ends.
async fn serve_unattended(
    server: &mut Option<ServerTask>,
    producer: &mut Option<ProducerTask>,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    tokio::select! {
        _ = shutdown.cancelled() => Ok(()),
        result = join_task(&mut *server) => Err(server_exit_error(result).into()),
        result = join_task(&mut *producer) => {
            let total = producer_result(result)?;
            info!(total, "Live source ended");
            Ok(())
        }
    }
}

/// Runs `operation` unless `shutdown` fires first.
async fn unless_interrupted<F: Future>(
    shutdown: &CancellationToken,
    operation: F,
) -> Option<F::Output> {
    tokio::select! {
        _ = shutdown.cancelled() => None,
        output = operation => Some(output),
    }
}

/// Awaits a task held in `slot`, emptying the slot once it has finished.
/// Never resolves for an empty slot.
async fn join_task<T>(slot: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    let Some(handle) = slot.as_mut() else {
        return std::future::pending().await;
    };
    let result = handle.await;
    *slot = None;
    result
}

fn server_exit_error(result: Result<Result<(), CastError>, JoinError>) -> CastError {
    match result {
        Ok(Err(e)) => e,
        Ok(Ok(())) => CastError::Transport {
            addr: "origin server".to_string(),
            reason: "stopped unexpectedly".to_string(),
        },
        Err(e) => CastError::Transport {
            addr: "origin server".to_string(),
            reason: format!("task failed: {e}"),
        },
    }
}

fn producer_result(result: Result<Result<u64, CastError>, JoinError>) -> Result<u64, CastError> {
    result.map_err(|e| CastError::StreamSource {
        reason: format!("live producer task failed: {e}"),
    })?
}

async fn stop_server(cancel: CancellationToken, task: Option<ServerTask>) {
    cancel.cancel();
    let Some(task) = task else {
        return;
    };
    match tokio::time::timeout(SERVER_SHUTDOWN_GRACE, task).await {
        Ok(Ok(Err(e))) => warn!("Origin server error during shutdown: {e}"),
        Ok(_) => {}
        Err(_) => warn!("Origin server did not stop within {SERVER_SHUTDOWN_GRACE:?}"),
    }
}

/// Token cancelled on the first Ctrl-C.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            trigger.cancel();
        }
    });
    token
}
