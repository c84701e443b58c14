use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pipeloop_channel::{wait, Channel, ChannelConfig};
use tracing::info;

use crate::cmd::ListenArgs;
use crate::exit::{channel_error, io_error, CliError, CliResult, SUCCESS};

const POLL_CADENCE: Duration = Duration::from_millis(100);

pub fn run(args: ListenArgs) -> CliResult<i32> {
    let mut config = ChannelConfig {
        accept_timeout: Duration::from_secs(args.accept_timeout),
        ..ChannelConfig::default()
    };
    if let Some(size) = args.read_buffer_size {
        config.read_buffer_size = size;
    }

    let mut channel = Channel::with_config(config);
    channel
        .accept_as_server(&args.path)
        .map_err(|err| channel_error("accept failed", err))?;
    info!(path = %args.path.display(), "peer connected");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut echoed = 0u64;
    let mut signals = Vec::new();
    while running.load(Ordering::SeqCst) && !channel.is_closed() {
        signals.clear();
        let active = channel.advance(&mut signals);

        let data = channel.read_all();
        if !data.is_empty() {
            echoed += data.len() as u64;
            channel.write(&data);
        }

        if !active && data.is_empty() {
            wait(&signals, Some(POLL_CADENCE)).map_err(|err| io_error("wait failed", err))?;
        }
    }

    info!(echoed, "peer disconnected");
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
