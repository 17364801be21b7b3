use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use clap::Parser;
use crossterm::terminal;
use log::error;
use v6unix::System;

/// Boot Research UNIX V6 from a disk archive and attach it to this
/// terminal.
#[derive(Parser)]
struct Args {
    /// Disk archive to boot from
    disk: PathBuf,

    /// Program to start as pid 1
    #[arg(long, default_value = "/etc/init")]
    init: String,
}

enum Input {
    Byte(u8),
    Eof,
}

// 034 (FS, control-backslash territory) asks the host to exit.
const QUIT: u8 = 0x1c;

fn main() {
    env_logger::init();
    let args = Args::parse();

    let archive = match std::fs::read(&args.disk) {
        Ok(b) => b,
        Err(e) => {
            error!("{}: {e}", args.disk.display());
            std::process::exit(1);
        }
    };
    let mut sys = match System::new(&archive) {
        Ok(sys) => sys,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let init = match sys.read_file(&args.init) {
        Ok(b) => b,
        Err(e) => {
            error!("{}: {e}", args.init);
            std::process::exit(1);
        }
    };

    terminal::enable_raw_mode().expect("raw mode");
    let restore = || {
        let _ = terminal::disable_raw_mode();
    };

    if let Err(e) = sys.start(&init, &[&args.init], RawStdout) {
        restore();
        error!("{e}");
        std::process::exit(1);
    }

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = [0u8; 100];
        let mut stdin = io::stdin();
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => {
                    let _ = tx.send(Input::Eof);
                    return;
                }
                Ok(n) => {
                    for &c in &buf[..n] {
                        if tx.send(Input::Byte(c)).is_err() {
                            return;
                        }
                    }
                }
                Err(_) => {
                    let _ = tx.send(Input::Eof);
                    return;
                }
            }
        }
    });

    loop {
        sys.wait();
        let want_input = sys.tty_read != 0;
        let timer = sys.timer;
        if !want_input && timer.is_none() {
            break;
        }

        let ev = if let Some(t) = timer {
            let dur = t.saturating_duration_since(Instant::now());
            match rx.recv_timeout(dur) {
                Ok(ev) => Some(ev),
                Err(mpsc::RecvTimeoutError::Timeout) => None, // sys.wait fires the timer
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match rx.recv() {
                Ok(ev) => Some(ev),
                Err(_) => break,
            }
        };

        if let Some(ev) = ev {
            feed(&mut sys, ev, &restore);
            // drain whatever else is queued before rescheduling
            while let Ok(ev) = rx.try_recv() {
                feed(&mut sys, ev, &restore);
            }
        }
    }
    restore();
}

fn feed(sys: &mut System, ev: Input, restore: &dyn Fn()) {
    match ev {
        Input::Byte(QUIT) => {
            restore();
            std::process::exit(0);
        }
        Input::Byte(c) => sys.tty_input(8, c),
        Input::Eof => {
            sys.ttys[8].eof = true;
            sys.tty_input(8, 0o004);
        }
    }
}

/// Raw-mode stdout: the guest writes its own carriage returns.
struct RawStdout;

impl Write for RawStdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = io::stdout().lock();
        let mut n = 0;
        for &c in buf {
            if c == b'\n' {
                out.write_all(b"\r\n")?;
            } else {
                out.write_all(&[c])?;
            }
            n += 1;
        }
        out.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().lock().flush()
    }
}
