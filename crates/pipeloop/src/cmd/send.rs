use std::fs;
use std::io::Write;
use std::time::{Duration, Instant};

use pipeloop_channel::{wait, Channel};

use crate::cmd::SendArgs;
use crate::exit::{channel_error, io_error, CliResult, FAILURE, SUCCESS};

const POLL_CADENCE: Duration = Duration::from_millis(50);

pub fn run(args: SendArgs) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;

    let mut channel = Channel::new();
    channel
        .connect_to_server(&args.path)
        .map_err(|err| channel_error("connect failed", err))?;

    channel.write(&payload);

    let mut signals = Vec::new();
    while channel.bytes_to_send() > 0 {
        if channel.is_closed() {
            return Err(crate::exit::CliError::new(
                FAILURE,
                "peer closed the pipe before the payload drained",
            ));
        }
        signals.clear();
        let active = channel.advance(&mut signals);
        if !active {
            wait(&signals, Some(POLL_CADENCE)).map_err(|err| io_error("wait failed", err))?;
        }
    }

    if args.reply_timeout > 0 {
        let reply = collect_reply(&mut channel, Duration::from_millis(args.reply_timeout))
            .map_err(|err| io_error("wait failed", err))?;
        if !reply.is_empty() {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&reply)
                .and_then(|()| stdout.flush())
                .map_err(|err| io_error("stdout write failed", err))?;
        }
    }

    Ok(SUCCESS)
}

fn collect_reply(channel: &mut Channel, timeout: Duration) -> std::io::Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut reply = Vec::new();
    let mut signals = Vec::new();
    loop {
        signals.clear();
        let active = channel.advance(&mut signals);
        reply.extend_from_slice(&channel.read_all());

        if channel.is_closed() {
            return Ok(reply);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(reply);
        }
        if !active {
            wait(&signals, Some((deadline - now).min(POLL_CADENCE)))?;
        }
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}
