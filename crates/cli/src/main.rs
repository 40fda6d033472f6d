use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use h265_rtp::media::nal::{self, ANNEX_B_START_CODE};
use h265_rtp::sink::DEFAULT_QUEUE_CAPACITY;
use h265_rtp::{
    AccessUnitQueue, Backpressure, H265Packetizer, NalUnit, Packetizer, PacketizerConfig,
    Receiver, ReceiverConfig, ReceiverStats, StreamSender, UdpTransport, receive_loop, sdp,
};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "h265-rtp", about = "Send and receive H.265 video over RTP/UDP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream an Annex B .h265 file to a UDP destination
    Send(SendArgs),
    /// Receive an RTP stream and write it as Annex B
    Receive(ReceiveArgs),
}

#[derive(Args)]
struct SendArgs {
    /// Annex B elementary stream
    #[arg(long, short)]
    input: PathBuf,
    /// Destination address (host:port)
    #[arg(long, short)]
    dest: SocketAddr,
    /// Local bind address (host:port)
    #[arg(long, default_value = "0.0.0.0:0")]
    bind: String,
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Maximum RTP payload size in bytes
    #[arg(long, default_value_t = 1200)]
    mtu_payload: usize,
    #[arg(long, default_value_t = 98)]
    payload_type: u8,
    /// Write an SDP file describing the stream
    #[arg(long)]
    sdp: Option<PathBuf>,
    /// Restart from the beginning of the file at end of input
    #[arg(long = "loop")]
    repeat: bool,
}

#[derive(Args)]
struct ReceiveArgs {
    /// Bind address (host:port)
    #[arg(long, short)]
    bind: String,
    /// Write received access units here in Annex B form
    #[arg(long, short)]
    output: Option<PathBuf>,
    /// Access-unit queue depth
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue: usize,
    /// Evict the oldest queued unit instead of dropping the newest
    #[arg(long)]
    drop_oldest: bool,
    /// Seconds between statistics lines (0 disables)
    #[arg(long, default_value_t = 5)]
    stats_interval: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Send(args) => send(args),
        Command::Receive(args) => receive(args),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

/// Clear `running` when the user presses Enter.
fn stop_on_enter(running: Arc<AtomicBool>) {
    thread::spawn(move || {
        let mut input = String::new();
        let _ = io::stdin().read_line(&mut input);
        running.store(false, Ordering::SeqCst);
    });
}

fn send(args: SendArgs) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(&args.input)?;
    let nal_units = nal::split_annex_b(&data)
        .into_iter()
        .filter_map(|bytes| match NalUnit::new(bytes.to_vec()) {
            Ok(nal) => Some(nal),
            Err(e) => {
                tracing::warn!(error = %e, "skipping NAL unit");
                None
            }
        });
    let frames: Vec<Vec<u8>> = nal::group_access_units(nal_units)
        .into_iter()
        .map(|unit| {
            let mut frame = Vec::new();
            for nal in &unit {
                frame.extend_from_slice(&ANNEX_B_START_CODE);
                frame.extend_from_slice(nal.as_bytes());
            }
            frame
        })
        .collect();

    if frames.is_empty() {
        return Err(format!("no NAL units found in {}", args.input.display()).into());
    }
    tracing::info!(file = %args.input.display(), frames = frames.len(), "input loaded");

    let config = PacketizerConfig {
        payload_type: args.payload_type,
        max_payload_size: args.mtu_payload,
        frame_rate: args.fps,
        ..PacketizerConfig::default()
    };
    let sender = StreamSender::connect(H265Packetizer::new(config)?, &args.bind[..], args.dest)?;

    let running = Arc::new(AtomicBool::new(true));
    stop_on_enter(running.clone());
    println!("Sending to {}, press Enter to stop", args.dest);

    let fps = sender.with_packetizer(|p| p.frame_rate());
    let frame_interval = Duration::from_secs(1) / fps;
    let mut sdp_written = args.sdp.is_none();
    let mut frames_sent = 0u64;
    let mut packets_sent = 0u64;
    let mut bytes_sent = 0u64;
    let mut next_deadline = Instant::now();

    'outer: loop {
        for frame in &frames {
            if !running.load(Ordering::SeqCst) {
                break 'outer;
            }

            let report = sender.send_frame(frame, fps)?;
            frames_sent += 1;
            packets_sent += report.packets as u64;
            bytes_sent += report.bytes as u64;

            if !sdp_written && let Some(path) = &args.sdp {
                let description = sender.with_packetizer(|p| {
                    sdp::session_description(&*p, args.dest.ip(), args.dest.port(), "h265-rtp")
                });
                fs::write(path, description)?;
                tracing::info!(path = %path.display(), "SDP written");
                sdp_written = true;
            }

            next_deadline += frame_interval;
            if let Some(wait) = next_deadline.checked_duration_since(Instant::now()) {
                thread::sleep(wait);
            }
        }
        if !args.repeat {
            break;
        }
        tracing::debug!("end of input, looping");
    }

    let next_sequence = sender.with_packetizer(|p| p.next_sequence());
    tracing::info!(
        frames = frames_sent,
        packets = packets_sent,
        bytes = bytes_sent,
        next_sequence,
        "send finished"
    );
    Ok(())
}

fn receive(args: ReceiveArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ReceiverConfig {
        queue_capacity: args.queue,
        backpressure: if args.drop_oldest {
            Backpressure::DropOldest
        } else {
            Backpressure::DropNewest
        },
        ..ReceiverConfig::default()
    };
    let (receiver, queue) = Receiver::with_queue(config);
    let receiver = Arc::new(Mutex::new(receiver));

    let transport = UdpTransport::bind(&args.bind[..])?;
    tracing::info!(addr = %transport.local_addr()?, "listening for RTP");

    let running = Arc::new(AtomicBool::new(true));
    let net = {
        let receiver = receiver.clone();
        let running = running.clone();
        thread::spawn(move || receive_loop(transport, receiver, running))
    };

    let writer = match &args.output {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };
    let writing = Arc::new(AtomicBool::new(true));
    let consumer = {
        let writing = writing.clone();
        thread::spawn(move || consume(queue, writer, writing))
    };

    stop_on_enter(running.clone());
    println!("Receiving on {}, press Enter to stop", args.bind);

    let interval = Duration::from_secs(args.stats_interval);
    let mut last_report = Instant::now();
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
        if !interval.is_zero() && last_report.elapsed() >= interval {
            print_stats(&receiver.lock().stats());
            last_report = Instant::now();
        }
    }

    if net.join().is_err() {
        tracing::warn!("receive thread panicked");
    }
    receiver.lock().flush();
    writing.store(false, Ordering::SeqCst);
    match consumer.join() {
        Ok(result) => result?,
        Err(_) => tracing::warn!("writer thread panicked"),
    }

    print_stats(&receiver.lock().stats());
    Ok(())
}

/// Drain `queue` into `writer` until `writing` clears and the queue is empty.
fn consume(
    queue: AccessUnitQueue,
    mut writer: Option<BufWriter<File>>,
    writing: Arc<AtomicBool>,
) -> io::Result<()> {
    loop {
        match queue.pop_timeout(Duration::from_millis(100)) {
            Some(access_unit) => {
                tracing::trace!(
                    timestamp = access_unit.timestamp,
                    nal_units = access_unit.nal_units().len(),
                    keyframe = access_unit.is_keyframe(),
                    "access unit"
                );
                if let Some(w) = writer.as_mut() {
                    w.write_all(&access_unit.to_annex_b())?;
                }
            }
            None if !writing.load(Ordering::SeqCst) => break,
            None => {}
        }
    }
    if let Some(w) = writer.as_mut() {
        w.flush()?;
    }
    Ok(())
}

fn print_stats(stats: &ReceiverStats) {
    println!(
        "packets={} bytes={} lost={} loss={:.2}% access_units={} incomplete={} dropped={} queue_dropped={} resyncs={} evicted_sources={}",
        stats.packets_received,
        stats.bytes_received,
        stats.packets_lost,
        stats.loss_rate() * 100.0,
        stats.access_units_emitted,
        stats.incomplete_access_units,
        stats.drops.total(),
        stats.sink_dropped,
        stats.resyncs,
        stats.evicted_sources,
    );
}
