//! Plays a Standard MIDI File through a `midir` output port.
//!
//! `cargo run --example play --features midir -- path/to/song.mid`

use std::fs;
use std::io::{stdin, stdout, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use midir::MidiOutput;

use playtrack::config::Config;
use playtrack::device::MidirDevice;
use playtrack::emitter::{EndOfSong, EventEmitter};
use playtrack::group::PlayheadGroup;
use playtrack::header;
use playtrack::playhead::TrackPlayhead;
use playtrack::track::{SpanTrack, Track};

#[derive(Parser)]
struct Args {
    /// Path to the `.mid` file to play.
    file: String,

    /// MIDI output port index, skipping the interactive prompt.
    #[arg(short, long)]
    port: Option<usize>,
}

fn choose_port(output: &MidiOutput, requested: Option<usize>) -> Result<usize> {
    let ports = output.ports();
    if ports.is_empty() {
        bail!("no MIDI output ports available");
    }

    if let Some(index) = requested {
        if index >= ports.len() {
            bail!("port {index} is out of range (0..{})", ports.len());
        }
        return Ok(index);
    }

    loop {
        println!("Available MIDI ports:");
        for (i, port) in ports.iter().enumerate() {
            println!("{i}: {}", output.port_name(port).unwrap_or_default());
        }

        print!("Please select a port: ");
        stdout().flush()?;
        let mut input = String::new();
        stdin().read_line(&mut input)?;

        match input.trim().parse::<usize>() {
            Ok(index) if index < ports.len() => return Ok(index),
            Ok(index) => println!("port {index} is out of range (0..{})", ports.len()),
            Err(_) => println!("not a number: {}", input.trim()),
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let bytes = fs::read(&args.file).with_context(|| format!("reading {}", args.file))?;
    let config = Config::default();
    let (smf_header, chunks) = header::parse_smf(&bytes, config.strict_header_length())
        .context("parsing SMF header")?;
    log::info!(
        "{}: format {}, {} track(s)",
        args.file,
        smf_header.format,
        chunks.len()
    );

    let output = MidiOutput::new("playtrack-play")?;
    let port_index = choose_port(&output, args.port)?;
    let port_name = output.port_name(&output.ports()[port_index])?;
    let connection = output.connect(&output.ports()[port_index], "playtrack-play")?;
    let device = MidirDevice::new(connection);
    println!("connected to {port_name}");

    let emitter = EventEmitter::new();
    let finished = Arc::new(AtomicBool::new(false));
    {
        let finished = Arc::clone(&finished);
        emitter.add_handler::<EndOfSong, _>(move |_| {
            finished.store(true, Ordering::Release);
        });
    }

    let group = PlayheadGroup::new(&config).with_emitter(&emitter);
    for (i, chunk) in chunks.iter().copied().enumerate() {
        let track = SpanTrack::new(chunk)?;
        let mut playhead =
            TrackPlayhead::new(format!("track {i}"), config.tempo_change_aware())
                .with_device(&device)
                .with_emitter(&emitter);
        playhead.set_division(smf_header.division);
        playhead.bind_track(track.iter())?;
        group.add_playhead(
            playhead,
            move || SpanTrack::new(chunk).unwrap().iter(),
            Duration::ZERO,
        );
    }

    thread::scope(|scope| {
        let handle = group.run(scope);
        group.play();

        while !finished.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(20));
        }

        group.shutdown();
        handle.join().unwrap();
    });

    Ok(())
}
