use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use packet_streamer::capture::{
    check_filter, list_interfaces, pick_default, CaptureController, FileOpener, LiveOpener,
    SessionReport, SourceOpener,
};
use packet_streamer::config::Config;
use packet_streamer::decode::{LinkLayer, PacketSummary};
use packet_streamer::sink::{ChannelSink, EventSink, JsonLinesSink};
use packet_streamer::ui::App;
use std::io;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "packet-streamer")]
#[command(about = "Live packet capture streamed as decoded per-frame summaries")]
struct Cli {
    #[arg(short, long, help = "Network interface to capture on")]
    interface: Option<String>,

    #[arg(short, long, help = "Capture filter expression, or 'all' for no filter")]
    filter: Option<String>,

    #[arg(short, long, help = "Configuration file path")]
    config: Option<String>,

    #[arg(short, long, value_name = "FILE", help = "Replay a pcap file instead of a live device")]
    read: Option<String>,

    #[arg(short, long, help = "List capture devices and exit")]
    list_devices: bool,

    #[arg(long, help = "Write JSON lines to stdout instead of starting the live view")]
    json: bool,

    #[arg(long, help = "Put the interface into promiscuous mode")]
    promiscuous: bool,

    #[arg(long, help = "Attach a per-layer breakdown and hex dump to every packet")]
    dump: bool,

    #[arg(short, long, help = "Enable debug logging")]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // the live view owns the terminal, so it only logs when asked to
    let headless = cli.json || cli.list_devices;
    if headless || cli.debug {
        let level = if cli.debug { "debug" } else { "info" };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    if let Some(filter) = cli.filter {
        config.capture.filter = filter;
    }
    if cli.interface.is_some() {
        config.capture.interface = cli.interface;
    }
    config.capture.promiscuous |= cli.promiscuous;
    config.decoder.layer_dump |= cli.dump;

    if cli.list_devices {
        return print_devices(cli.json);
    }

    check_filter(&config.capture.filter, LinkLayer::Ethernet)
        .context("Capture filter rejected")?;

    let runtime = Runtime::new().context("Failed to start the tokio runtime")?;
    let reports = match cli.read {
        Some(path) => stream(&runtime, FileOpener, &path, &config, cli.json)?,
        None => {
            let device = config
                .capture
                .interface
                .clone()
                .unwrap_or_else(|| pick_default(&list_interfaces()));
            let opener = LiveOpener::new(config.capture.clone());
            stream(&runtime, opener, &device, &config, cli.json)?
        }
    };

    summarize(&reports)
}

fn print_devices(json: bool) -> Result<()> {
    let interfaces = list_interfaces();
    if json {
        println!("{}", serde_json::to_string_pretty(&interfaces)?);
        return Ok(());
    }

    if interfaces.is_empty() {
        warn!("No capture devices found; capturing usually needs root or cap_net_raw");
    }
    for iface in &interfaces {
        let mut flags = Vec::new();
        if iface.is_up {
            flags.push("up");
        }
        if iface.is_loopback {
            flags.push("loopback");
        }
        println!("{:<16} [{}] {}", iface.name, flags.join(","), iface.description);
        for address in &iface.addresses {
            println!("{:<16}   {}", "", address.network);
        }
    }
    Ok(())
}

fn stream<O: SourceOpener>(
    runtime: &Runtime,
    opener: O,
    device: &str,
    config: &Config,
    json: bool,
) -> Result<Vec<SessionReport>> {
    let (sink, events) = ChannelSink::channel(config.capture.event_buffer);
    let controller = CaptureController::new(opener, sink)
        .with_filter(config.capture.filter.clone())
        .with_decoder_options(config.decoder);

    if json {
        return Ok(runtime.block_on(stream_json(controller, events, device)));
    }

    let mut app = App::new(controller, events, device, config.ui.clone());
    let result = {
        let _guard = runtime.enter();
        app.start();
        app.run()
    };
    let reports = runtime.block_on(app.shutdown());
    result?;
    Ok(reports)
}

async fn stream_json<O: SourceOpener>(
    mut controller: CaptureController<O, ChannelSink>,
    mut events: mpsc::Receiver<PacketSummary>,
    device: &str,
) -> Vec<SessionReport> {
    controller.start_capture(device);
    let mut out = JsonLinesSink::new(io::stdout());

    {
        let finished = async {
            if let Some(handle) = controller.active() {
                handle.finished().await
            }
        };
        tokio::pin!(finished);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                biased;
                _ = &mut ctrl_c => {
                    info!("Interrupted, stopping capture");
                    break;
                }
                event = events.recv() => match event {
                    Some(summary) => {
                        if out.emit(summary).is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = &mut finished => {
                    // the loop has exited, so everything it sent is already queued
                    while let Ok(summary) = events.try_recv() {
                        if out.emit(summary).is_err() {
                            break;
                        }
                    }
                    break;
                }
            }
        }
    }

    // a session blocked on a full channel only sees the stop once this is gone
    drop(events);
    controller.shutdown().await
}

fn summarize(reports: &[SessionReport]) -> Result<()> {
    for report in reports {
        info!(
            "Session {} on {}: {} ({} frames read, {} delivered, {} discarded, {} partly decoded)",
            report.session,
            report.device,
            report.reason,
            report.stats.frames_read,
            report.stats.frames_delivered,
            report.stats.frames_discarded,
            report.stats.decode_failures
        );
    }

    if let Some(failed) = reports.iter().find(|r| r.reason.is_failure()) {
        bail!("Capture on {} failed: {}", failed.device, failed.reason);
    }
    Ok(())
}
