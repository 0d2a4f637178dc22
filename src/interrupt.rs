//! Ctrl-C handling for the acquisition loop.
//!
//! The first SIGINT only raises a flag that the recording loop polls, so the
//! run can stop cleanly and still print its summary. The handler restores
//! the default disposition, so a second Ctrl-C kills the process as usual.
//!
//! Blocking reads are restarted after the handler returns, so operator input
//! is read on its own thread through [InterruptibleLines] and a prompt gives
//! up as soon as the flag goes up.

use log::warn;
use std::{
    io::{self, BufRead, BufReader},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError},
    },
    thread,
    time::Duration,
};

/// How often a waiting prompt looks at the flag.
const INPUT_POLL: Duration = Duration::from_millis(100);

static SIGINT_RAISED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signum: libc::c_int) {
    SIGINT_RAISED.store(true, Ordering::SeqCst);
    // Only async-signal-safe calls in here.
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_DFL);
    }
}

/// A flag that is raised when the operator asks to stop.
#[derive(Debug, Clone, Copy)]
pub struct Interrupt {
    flag: &'static AtomicBool,
}

impl Interrupt {
    /// Install the SIGINT handler and return the flag it raises.
    pub fn sigint() -> Self {
        let handler = on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t;
        // SAFETY: the handler only touches an atomic and calls signal(2),
        // both of which are async-signal-safe.
        let previous = unsafe { libc::signal(libc::SIGINT, handler) };
        if previous == libc::SIG_ERR {
            warn!("could not install the Ctrl-C handler, Ctrl-C will exit immediately");
        }
        Self {
            flag: &SIGINT_RAISED,
        }
    }

    /// A flag no signal is wired to, raised only through [Interrupt::raise].
    pub fn detached() -> Self {
        Self {
            flag: Box::leak(Box::new(AtomicBool::new(false))),
        }
    }

    /// Whether a stop was requested.
    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Request a stop, as if Ctrl-C had been pressed.
    pub fn raise(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Forget a previous stop request.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// What the operator gave us when asked for a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// One line, trimmed
    Line(String),
    /// End of input, or input that could not be read
    Closed,
    /// The interrupt flag went up first
    Interrupted,
}

/// Lines from a reader, handed over by a background thread so that waiting
/// for one can be cut short by an [Interrupt].
pub struct InterruptibleLines {
    lines: Receiver<io::Result<String>>,
    interrupt: Interrupt,
}

impl InterruptibleLines {
    /// Read lines from `input` until it ends. The reading thread is never
    /// joined, it goes away with the process.
    pub fn spawn<R: BufRead + Send + 'static>(input: R, interrupt: Interrupt) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("operator-input".to_owned())
            .spawn(move || {
                for line in input.lines() {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self {
            lines: rx,
            interrupt,
        })
    }

    /// Lines typed on the terminal.
    pub fn stdin(interrupt: Interrupt) -> io::Result<Self> {
        Self::spawn(BufReader::new(io::stdin()), interrupt)
    }

    /// Wait for the next line. A raised flag wins over a line that is
    /// already waiting.
    pub fn next_line(&self) -> Input {
        loop {
            if self.interrupt.is_raised() {
                return Input::Interrupted;
            }
            match self.lines.recv_timeout(INPUT_POLL) {
                Ok(Ok(line)) => return Input::Line(line.trim().to_owned()),
                Ok(Err(e)) => {
                    warn!("could not read operator input: {}", e);
                    return Input::Closed;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Input::Closed,
            }
        }
    }
}
