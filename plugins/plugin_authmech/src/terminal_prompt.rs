//! Credential prompt on the controlling terminal.
//!
//! Used where no graphical agent is available, e.g. `sudo`-style hosts and
//! the `authengine` test host. `present` opens the terminal and hands the
//! conversation to a reader thread, so the host gets control back while the
//! user types and can take the prompt down with a deactivation. The reader
//! polls its descriptor and gives up once [`TerminalPrompt::dismiss`] flags
//! its session.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use plugin_core::{Credential, CredentialPrompt, EngineRef, PromptError, PromptRequest, PromptResponder};

const DEFAULT_TTY: &str = "/dev/tty";

/// How long one `poll` waits before the cancel flag is looked at again.
const POLL_INTERVAL_MS: libc::c_int = 100;

type Sessions = Arc<Mutex<HashMap<EngineRef, Arc<AtomicBool>>>>;

pub struct TerminalPrompt {
    tty: PathBuf,
    /// Cancel flag of the reader thread serving each engine.
    sessions: Sessions,
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self::with_tty(DEFAULT_TTY)
    }

    pub fn with_tty(tty: impl Into<PathBuf>) -> Self {
        TerminalPrompt {
            tty: tty.into(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<EngineRef, Arc<AtomicBool>>> {
        lock_sessions(&self.sessions)
    }
}

fn lock_sessions(sessions: &Sessions) -> MutexGuard<'_, HashMap<EngineRef, Arc<AtomicBool>>> {
    sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drop the session entry of `engine` unless a newer prompt replaced it.
fn forget(sessions: &Sessions, engine: EngineRef, cancel: &Arc<AtomicBool>) {
    let mut sessions = lock_sessions(sessions);
    if sessions.get(&engine).map_or(false, |current| Arc::ptr_eq(current, cancel)) {
        sessions.remove(&engine);
    }
}

/// Ask for a username and password on `output`, reading from `input`.
///
/// `Ok(None)` means the user cancelled by closing the input. An empty
/// answer keeps the pre-filled value.
pub fn read_credential<I, O, F>(
    request: &PromptRequest,
    input: &mut I,
    output: &mut O,
    read_password: F,
) -> io::Result<Option<Credential>>
where
    I: BufRead,
    O: Write,
    F: FnOnce(&mut I) -> io::Result<String>,
{
    if request.retry {
        writeln!(output, "Authentication failed, try again.")?;
    }

    let prefilled = request.username.clone().unwrap_or_default();
    let username = if request.username_editable {
        if prefilled.is_empty() {
            write!(output, "Username: ")?;
        } else {
            write!(output, "Username [{}]: ", prefilled)?;
        }
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        match line.trim() {
            "" => prefilled,
            typed => typed.to_string(),
        }
    } else {
        writeln!(output, "Username: {}", prefilled)?;
        prefilled
    };

    write!(output, "Password: ")?;
    output.flush()?;
    let mut password = read_password(input)?;
    writeln!(output)?;

    if password.is_empty() {
        if let Some(prefill) = &request.password_prefill {
            password.push_str(prefill);
        }
    }

    Ok(Some(Credential::new(username, password)))
}

/// Terminal input that stops blocking once `cancel` is set.
struct CancellableTty {
    file: File,
    cancel: Arc<AtomicBool>,
}

impl Read for CancellableTty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "prompt dismissed"));
            }

            let mut pollfd = libc::pollfd {
                fd: self.file.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let ready = unsafe { libc::poll(&mut pollfd, 1, POLL_INTERVAL_MS) };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if ready > 0 {
                return self.file.read(buf);
            }
        }
    }
}

/// Terminal echo switched off until dropped. Does nothing on a non-tty.
struct EchoOff {
    fd: RawFd,
    saved: Option<libc::termios>,
}

impl EchoOff {
    fn new(fd: RawFd) -> io::Result<Self> {
        if unsafe { libc::isatty(fd) } != 1 {
            return Ok(EchoOff { fd, saved: None });
        }

        let mut saved = std::mem::MaybeUninit::<libc::termios>::uninit();
        if unsafe { libc::tcgetattr(fd, saved.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let saved = unsafe { saved.assume_init() };

        let mut quiet = saved;
        quiet.c_lflag &= !libc::ECHO;
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &quiet) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(EchoOff { fd, saved: Some(saved) })
    }
}

impl Drop for EchoOff {
    fn drop(&mut self) {
        if let Some(saved) = &self.saved {
            unsafe {
                libc::tcsetattr(self.fd, libc::TCSANOW, saved);
            }
        }
    }
}

fn converse(
    request: PromptRequest,
    responder: PromptResponder,
    mut input: BufReader<CancellableTty>,
    mut output: File,
) {
    let answer = read_credential(&request, &mut input, &mut output, |input| {
        let _echo = EchoOff::new(input.get_ref().file.as_raw_fd())?;
        rpassword::read_password_from_bufread(input)
    });

    match answer {
        Ok(Some(credential)) => responder.submit(credential),
        Ok(None) => responder.cancel(),
        Err(e) => {
            liblogger::log_info!(&format!("engine {}: terminal prompt ended: {}", request.engine, e));
            // Denies, unless a deactivation already finished the invocation.
            drop(responder);
        }
    }
}

impl CredentialPrompt for TerminalPrompt {
    fn present(&self, request: PromptRequest, responder: PromptResponder) -> Result<(), PromptError> {
        let tty = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&self.tty)
            .map_err(|e| PromptError::Unavailable(format!("{}: {}", self.tty.display(), e)))?;
        let output = tty
            .try_clone()
            .map_err(|e| PromptError::Unavailable(e.to_string()))?;

        let engine = request.engine;
        let cancel = Arc::new(AtomicBool::new(false));
        let input = BufReader::new(CancellableTty {
            file: tty,
            cancel: Arc::clone(&cancel),
        });
        if let Some(previous) = self.sessions().insert(engine, Arc::clone(&cancel)) {
            previous.store(true, Ordering::SeqCst);
        }

        let sessions = Arc::clone(&self.sessions);
        let flag = Arc::clone(&cancel);
        thread::Builder::new()
            .name("authmech-prompt".to_string())
            .spawn(move || {
                converse(request, responder, input, output);
                forget(&sessions, engine, &flag);
            })
            .map_err(|e| {
                forget(&self.sessions, engine, &cancel);
                PromptError::Unavailable(e.to_string())
            })?;
        Ok(())
    }

    fn dismiss(&self, engine: EngineRef) {
        match self.sessions().remove(&engine) {
            Some(cancel) => {
                cancel.store(true, Ordering::SeqCst);
                liblogger::log_debug!(&format!("engine {}: terminal prompt dismissed", engine));
            }
            None => liblogger::log_debug!(&format!("engine {}: nothing to dismiss", engine)),
        }
    }
}
