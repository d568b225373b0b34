//! CFS CLI - container tools and emulator harness.
//!
//! Usage:
//!   cfs pack <dir>                      # container stream on stdout
//!   cfs unpack <dir>                    # container stream from stdin
//!   cfs run kernel.bin --fs-dir cfsin --out-dir cfsout
//!
//! Examples:
//!   cfs pack cfsin > image.cfs
//!   cfs unpack cfsout < image.cfs
//!   cfs run shell.bin --fs-dir cfsin    # interactive session
//!   cfs run asm.bin --input prog.asm    # batch run with a seekable tape

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tokio::sync::mpsc as tokio_mpsc;

use cfs_core::{
    pack_dir, unpack_to_dir, Addressing, BlockDevice, BusConfig, Console, Emulator, ExitReason,
    PortBus, StderrSink, DEFAULT_CAPACITY,
};

/// CFS container tools and z80 harness
#[derive(Parser, Debug)]
#[command(name = "cfs")]
#[command(about = "Pack/unpack CFS containers and run z80 images against them")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pack a directory into a container stream on stdout
    Pack {
        /// Source directory
        dir: PathBuf,
    },
    /// Unpack a container stream from stdin into a directory
    Unpack {
        /// Destination directory
        dir: PathBuf,
    },
    /// Run a z80 kernel image against a virtual block device
    Run {
        /// Kernel image, loaded at address 0
        kernel: PathBuf,

        /// Directory packed into the block device before the run
        #[arg(long)]
        fs_dir: Option<PathBuf>,

        /// Directory the mutated device is unpacked into after the run
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Use byte-lane address ports 2..4 with an auto-advancing data
        /// port, instead of the single phase-addressed port 2
        #[arg(long)]
        byte_lanes: bool,

        /// Feed this file as a seekable input tape instead of the terminal
        #[arg(long)]
        input: Option<PathBuf>,

        /// Trace I/O to stderr
        #[arg(short, long)]
        trace: bool,
    },
}

/// Channel-based console fed by the terminal input task.
struct ChannelConsole {
    key_rx: mpsc::Receiver<u8>,
}

impl ChannelConsole {
    fn new(key_rx: mpsc::Receiver<u8>) -> Self {
        Self { key_rx }
    }
}

impl Console for ChannelConsole {
    fn write_byte(&mut self, byte: u8) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();

        match byte {
            0x0D => {
                // CR - move to start of line
                let _ = handle.write_all(b"\r");
            }
            0x0A => {
                // LF - move down
                let _ = handle.write_all(b"\n");
            }
            0x08 => {
                // Backspace
                let _ = handle.write_all(b"\x08 \x08");
            }
            0x07 => {
                // Bell
                let _ = handle.write_all(b"\x07");
            }
            _ => {
                let _ = handle.write_all(&[byte]);
            }
        }
        let _ = handle.flush();
    }

    fn read_byte(&mut self) -> Option<u8> {
        // Blocking receive; a closed channel means input is exhausted.
        self.key_rx.recv().ok()
    }
}

/// Output-only console for batch runs driven by an input tape.
#[derive(Default)]
struct StdoutConsole;

impl Console for StdoutConsole {
    fn write_byte(&mut self, byte: u8) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        let _ = handle.write_all(&[byte]);
        let _ = handle.flush();
    }

    fn read_byte(&mut self) -> Option<u8> {
        None
    }
}

/// Translate crossterm key events to console bytes.
fn translate_key(code: KeyCode, modifiers: KeyModifiers) -> Option<u8> {
    // Handle control characters
    if modifiers.contains(KeyModifiers::CONTROL) {
        if let KeyCode::Char(c) = code {
            let upper = c.to_ascii_uppercase();
            if upper.is_ascii_uppercase() {
                return Some(upper as u8 - 64); // Ctrl+A=1, Ctrl+D=4, etc.
            }
        }
    }

    match code {
        KeyCode::Char(c) => Some(c as u8),
        KeyCode::Enter => Some(13),
        KeyCode::Backspace => Some(8),
        KeyCode::Tab => Some(9),
        KeyCode::Esc => Some(27),
        KeyCode::Up => Some(11),
        KeyCode::Down => Some(10),
        KeyCode::Left => Some(8),
        KeyCode::Right => Some(12),
        _ => None,
    }
}

fn cmd_pack(dir: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let stream = pack_dir(dir)?;
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    handle.write_all(&stream)?;
    handle.flush()?;
    Ok(())
}

fn cmd_unpack(dir: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = Vec::new();
    std::io::stdin().lock().read_to_end(&mut stream)?;
    let count = unpack_to_dir(&stream, dir)?;
    eprintln!("Unpacked {} entries into {}", count, dir.display());
    Ok(())
}

async fn cmd_run(
    kernel: PathBuf,
    fs_dir: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    byte_lanes: bool,
    input: Option<PathBuf>,
    trace: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let kernel = std::fs::read(&kernel)?;

    let addressing = if byte_lanes {
        Addressing::ByteLanes {
            low: 2,
            mid: 3,
            high: 4,
        }
    } else {
        Addressing::Phased { port: 2 }
    };
    let config = BusConfig {
        console_port: 0,
        data_port: 1,
        addressing,
        seek_port: input.as_ref().map(|_| 5),
        diag_port: Some(7),
    };
    let policy = config.addressing.advance_policy();

    let device = match &fs_dir {
        Some(dir) => {
            let stream = pack_dir(dir)?;
            eprintln!("Initialized block device ({} bytes)", stream.len());
            BlockDevice::with_contents(stream, DEFAULT_CAPACITY, policy)
        }
        None => BlockDevice::new(DEFAULT_CAPACITY, policy),
    };

    let (info, device) = if let Some(input) = &input {
        // Batch mode: no terminal, the tape is the input source.
        let tape = std::fs::read(input)?;
        let mut bus = PortBus::new(config, device, StdoutConsole, StderrSink);
        bus.install_tape(tape);

        let mut emu = Emulator::new(bus);
        emu.trace = trace;
        emu.load_kernel(&kernel);
        let info = emu.run();
        (info, emu.into_bus().into_device())
    } else {
        // Interactive mode: raw terminal, keys pumped through a channel.
        let (key_tx, key_rx) = mpsc::channel::<u8>();
        let (shutdown_tx, mut shutdown_rx) = tokio_mpsc::channel::<()>(1);
        let console = ChannelConsole::new(key_rx);
        let bus = PortBus::new(config, device, console, StderrSink);

        // Raw mode so the guest does its own echoing (gracefully handle
        // non-TTY).
        let raw_mode_enabled = enable_raw_mode().is_ok();

        let emu_handle = tokio::task::spawn_blocking(move || {
            let mut emu = Emulator::new(bus);
            emu.trace = trace;
            emu.load_kernel(&kernel);
            let info = emu.run();
            (info, emu.into_bus().into_device())
        });

        let input_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(10)) => {
                        // Poll for terminal events
                        if event::poll(Duration::from_millis(0)).unwrap_or(false) {
                            if let Ok(Event::Key(key_event)) = event::read() {
                                if let Some(byte) = translate_key(key_event.code, key_event.modifiers) {
                                    if key_tx.send(byte).is_err() {
                                        break; // Channel closed
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });

        let (info, device) = emu_handle.await?;

        let _ = shutdown_tx.send(()).await;
        let _ = input_handle.await;

        if raw_mode_enabled {
            let _ = disable_raw_mode();
        }
        eprintln!("Done!");
        (info, device)
    };

    if let Some(out_dir) = &out_dir {
        std::fs::create_dir_all(out_dir)?;
        let count = unpack_to_dir(device.contents(), out_dir)?;
        eprintln!("Unpacked {} entries into {}", count, out_dir.display());
    }

    // On HALT the guest's accumulator becomes the process exit status.
    Ok(match info.reason {
        ExitReason::Halt => i32::from(info.acc),
        ExitReason::EndOfSession => 0,
    })
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let result = match args.command {
        Command::Pack { dir } => cmd_pack(&dir).map(|()| 0),
        Command::Unpack { dir } => cmd_unpack(&dir).map(|()| 0),
        Command::Run {
            kernel,
            fs_dir,
            out_dir,
            byte_lanes,
            input,
            trace,
        } => cmd_run(kernel, fs_dir, out_dir, byte_lanes, input, trace).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
