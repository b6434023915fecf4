//! POSIX pseudoterminal backend
//!
//! Opens a master/slave pair with `openpty`, configures the slave with the
//! usual interactive defaults, then forks a child that makes the slave its
//! controlling terminal and execs the requested program.
//!
//! Everything the child needs (argv, envp, working directory) is built before
//! `fork`, so the child only performs async-signal-safe calls. An exec failure
//! is reported back over a close-on-exec pipe and surfaces as a spawn error
//! instead of a silently dead session.

use std::ffi::{CString, OsStr};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::pty::openpty;
use nix::sys::signal::{kill, Signal};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg,
    SpecialCharacterIndices as Cc,
};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult, Pid};

use crate::command::CommandSpec;
use crate::error::{Error, Result};
use crate::pty::{ChildExit, Pty};
use crate::size::WindowSize;

/// Grace period between SIGHUP and SIGKILL on close
const HANGUP_GRACE: Duration = Duration::from_millis(100);

/// Exit status of a child whose exec failed
const EXEC_FAILED: libc::c_int = 127;

#[cfg(target_os = "linux")]
const VDISABLE: libc::cc_t = 0;
#[cfg(not(target_os = "linux"))]
const VDISABLE: libc::cc_t = 0xff;

const fn ctrl(c: u8) -> libc::cc_t {
    c & 0x1f
}

/// A child process attached to a POSIX pty master
pub struct UnixPty {
    master: Option<File>,
    pid: Pid,
    exit: Option<ChildExit>,
    closed: bool,
}

impl UnixPty {
    /// Open a pty of `size` and run `command` on its slave side
    pub fn spawn(command: &CommandSpec, size: WindowSize) -> Result<Self> {
        let program = command.display_program();
        let exec_path = resolve_program(command.program())
            .ok_or_else(|| Error::spawn(&program, io::Error::from(io::ErrorKind::NotFound)))?;

        let exec_path = cstring(exec_path.as_os_str()).map_err(|e| Error::spawn(&program, e))?;
        let argv = std::iter::once(command.program())
            .chain(command.arguments().iter().map(|a| a.as_os_str()))
            .map(cstring)
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| Error::spawn(&program, e))?;
        let envp = command
            .environment()
            .into_iter()
            .map(|(key, value)| {
                let mut entry = key;
                entry.push("=");
                entry.push(value);
                cstring(&entry)
            })
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| Error::spawn(&program, e))?;
        let cwd = command
            .working_dir()
            .map(|dir| cstring(dir.as_os_str()))
            .transpose()
            .map_err(|e| Error::spawn(&program, e))?;

        let argv_ptrs = null_terminated(&argv);
        let envp_ptrs = null_terminated(&envp);

        let winsize = size.clamped().to_winsize();
        let pair = openpty(Some(&winsize), None).map_err(|e| Error::resource("pty pair", e))?;
        configure_slave(&pair.slave).map_err(|e| Error::resource("pty pair", e))?;
        set_cloexec(pair.master.as_raw_fd()).map_err(|e| Error::resource("pty pair", e))?;

        let (status_read, status_write) = pipe().map_err(|e| Error::resource("status pipe", e))?;
        set_cloexec(status_read.as_raw_fd()).map_err(|e| Error::resource("status pipe", e))?;
        set_cloexec(status_write.as_raw_fd()).map_err(|e| Error::resource("status pipe", e))?;

        let child = match unsafe { fork() } {
            Ok(ForkResult::Child) => unsafe {
                exec_child(ChildSetup {
                    master: pair.master.as_raw_fd(),
                    slave: pair.slave.as_raw_fd(),
                    status: status_write.as_raw_fd(),
                    exec_path: &exec_path,
                    argv: &argv_ptrs,
                    envp: &envp_ptrs,
                    cwd: cwd.as_ref(),
                })
            },
            Ok(ForkResult::Parent { child }) => child,
            Err(e) => return Err(Error::spawn(&program, e)),
        };

        drop(pair.slave);
        drop(status_write);

        if let Some(errno) = read_exec_status(status_read) {
            abandon_child(child);
            return Err(Error::spawn(&program, io::Error::from_raw_os_error(errno)));
        }

        let master = adopt_master(child, pair.master, set_nonblocking)?;

        log::debug!("spawned {} as pid {} on a {}x{} pty", program, child, size.cols, size.rows);

        Ok(Self {
            master: Some(master),
            pid: child,
            exit: None,
            closed: false,
        })
    }

    fn reap(&mut self, flags: Option<WaitPidFlag>) -> Result<Option<ChildExit>> {
        if self.exit.is_some() {
            return Ok(self.exit);
        }
        let status = match waitpid(self.pid, flags) {
            Ok(status) => status,
            Err(Errno::ECHILD) => return Ok(None),
            Err(e) => return Err(Error::channel("wait", e.into())),
        };
        self.exit = match status {
            WaitStatus::Exited(_, code) => Some(ChildExit::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(ChildExit::Signaled(signal as i32)),
            _ => None,
        };
        Ok(self.exit)
    }

    fn terminate_child(&mut self) -> Result<()> {
        if self.reap(Some(WaitPidFlag::WNOHANG))?.is_some() {
            return Ok(());
        }

        let _ = kill(self.pid, Signal::SIGHUP);
        let deadline = Instant::now() + HANGUP_GRACE;
        while Instant::now() < deadline {
            if self.reap(Some(WaitPidFlag::WNOHANG))?.is_some() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(10));
        }

        log::debug!("pid {} ignored SIGHUP, killing", self.pid);
        let _ = kill(self.pid, Signal::SIGKILL);
        self.reap(None)?;
        Ok(())
    }

    fn master(&self) -> io::Result<&File> {
        self.master
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl Pty for UnixPty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(master) = self.master.as_mut() else {
            return Ok(0);
        };
        match master.read(buf) {
            // Linux reports a hung-up slave as EIO rather than EOF
            Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(0),
            other => other,
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.master.as_mut() {
            Some(master) => master.write(buf),
            None => Err(io::Error::from(io::ErrorKind::BrokenPipe)),
        }
    }

    fn resize(&mut self, size: WindowSize) -> Result<()> {
        let resize_error = |source| Error::Resize {
            cols: size.cols,
            rows: size.rows,
            source,
        };
        let fd = self.master().map_err(resize_error)?.as_raw_fd();
        let ws = size.to_winsize();
        let result = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ as libc::c_ulong, &ws) };
        if result == -1 {
            return Err(resize_error(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn window_size(&self) -> Result<WindowSize> {
        let fd = self
            .master()
            .map_err(|e| Error::channel("query size", e))?
            .as_raw_fd();
        let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
        let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ as libc::c_ulong, &mut ws) };
        if result == -1 {
            return Err(Error::channel("query size", io::Error::last_os_error()));
        }
        Ok(WindowSize::from(ws))
    }

    fn process_id(&self) -> Option<u32> {
        u32::try_from(self.pid.as_raw()).ok()
    }

    fn try_wait(&mut self) -> Result<Option<ChildExit>> {
        self.reap(Some(WaitPidFlag::WNOHANG))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Closing the master hangs up the slave before any signal is sent
        self.master = None;
        self.terminate_child()?;
        log::debug!("pty for pid {} closed ({:?})", self.pid, self.exit);
        Ok(())
    }
}

impl Drop for UnixPty {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("error closing pty: {}", e);
        }
    }
}

/// Raw pieces the forked child needs, all prepared before `fork`
struct ChildSetup<'a> {
    master: RawFd,
    slave: RawFd,
    status: RawFd,
    exec_path: &'a CString,
    argv: &'a [*const libc::c_char],
    envp: &'a [*const libc::c_char],
    cwd: Option<&'a CString>,
}

/// Runs in the forked child. Never returns.
unsafe fn exec_child(setup: ChildSetup<'_>) -> ! {
    libc::close(setup.master);

    if libc::setsid() < 0 {
        fail(setup.status);
    }
    if libc::ioctl(setup.slave, libc::TIOCSCTTY as libc::c_ulong, 0) < 0 {
        fail(setup.status);
    }
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if libc::dup2(setup.slave, target) < 0 {
            fail(setup.status);
        }
    }
    if setup.slave > libc::STDERR_FILENO {
        libc::close(setup.slave);
    }

    if let Some(cwd) = setup.cwd {
        // A missing working directory is not fatal; the shell starts where we are
        libc::chdir(cwd.as_ptr());
    }

    libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    let mut empty: libc::sigset_t = std::mem::zeroed();
    libc::sigemptyset(&mut empty);
    libc::sigprocmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut());

    libc::execve(setup.exec_path.as_ptr(), setup.argv.as_ptr(), setup.envp.as_ptr());
    fail(setup.status)
}

/// Report errno to the parent over the status pipe and exit
unsafe fn fail(status: RawFd) -> ! {
    let errno = Errno::last_raw();
    let bytes = errno.to_ne_bytes();
    libc::write(status, bytes.as_ptr().cast(), bytes.len());
    libc::_exit(EXEC_FAILED)
}

/// Wait for the exec status pipe to close. Returns the child's errno if exec
/// failed.
fn read_exec_status(fd: OwnedFd) -> Option<i32> {
    let mut pipe = File::from(fd);
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match pipe.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    (filled == buf.len()).then(|| i32::from_ne_bytes(buf))
}

/// Interactive defaults for a fresh terminal, equivalent to the BSD
/// `TTYDEF_*` values plus UTF-8 input processing.
fn configure_slave(slave: &OwnedFd) -> nix::Result<()> {
    let mut term = termios::tcgetattr(slave)?;

    term.input_flags = InputFlags::BRKINT
        | InputFlags::ICRNL
        | InputFlags::IMAXBEL
        | InputFlags::IXON
        | InputFlags::IXANY;
    #[cfg(target_os = "linux")]
    {
        term.input_flags |= InputFlags::IUTF8;
    }
    term.output_flags = OutputFlags::OPOST | OutputFlags::ONLCR;
    term.local_flags = LocalFlags::ECHO
        | LocalFlags::ICANON
        | LocalFlags::ISIG
        | LocalFlags::IEXTEN
        | LocalFlags::ECHOE
        | LocalFlags::ECHOKE
        | LocalFlags::ECHOCTL
        | LocalFlags::ECHONL
        | LocalFlags::PENDIN;
    term.control_flags = ControlFlags::CREAD | ControlFlags::CS8 | ControlFlags::HUPCL;
    termios::cfsetispeed(&mut term, BaudRate::B9600)?;
    termios::cfsetospeed(&mut term, BaudRate::B9600)?;

    let cc = &mut term.control_chars;
    cc[Cc::VEOF as usize] = ctrl(b'D');
    cc[Cc::VEOL as usize] = VDISABLE;
    cc[Cc::VEOL2 as usize] = VDISABLE;
    cc[Cc::VERASE as usize] = 0x7f;
    cc[Cc::VINTR as usize] = ctrl(b'C');
    cc[Cc::VKILL as usize] = ctrl(b'U');
    cc[Cc::VMIN as usize] = 1;
    cc[Cc::VQUIT as usize] = ctrl(b'\\');
    cc[Cc::VSUSP as usize] = ctrl(b'Z');
    cc[Cc::VTIME as usize] = 0;
    cc[Cc::VSTART as usize] = ctrl(b'Q');
    cc[Cc::VSTOP as usize] = ctrl(b'S');
    cc[Cc::VLNEXT as usize] = ctrl(b'V');
    cc[Cc::VDISCARD as usize] = ctrl(b'O');
    cc[Cc::VWERASE as usize] = ctrl(b'W');
    cc[Cc::VREPRINT as usize] = ctrl(b'R');
    #[cfg(target_os = "macos")]
    {
        cc[Cc::VSTATUS as usize] = ctrl(b'T');
        cc[Cc::VDSUSP as usize] = ctrl(b'Y');
    }

    termios::tcsetattr(slave, SetArg::TCSANOW, &term)
}

/// Take the parent's end of a freshly spawned pty. If `prepare` fails the
/// child is killed and reaped before the error is returned.
fn adopt_master(
    child: Pid,
    master: OwnedFd,
    prepare: impl FnOnce(RawFd) -> nix::Result<()>,
) -> Result<File> {
    let master = File::from(master);
    if let Err(e) = prepare(master.as_raw_fd()) {
        abandon_child(child);
        return Err(Error::resource("pty pair", e));
    }
    Ok(master)
}

fn abandon_child(child: Pid) {
    let _ = kill(child, Signal::SIGKILL);
    let _ = waitpid(child, None);
}

fn set_cloexec(fd: RawFd) -> nix::Result<()> {
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

fn cstring(s: &OsStr) -> io::Result<CString> {
    CString::new(s.as_bytes()).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

/// Locate `program` the way `execvp` would, but before forking
fn resolve_program(program: &OsStr) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if program.as_bytes().contains(&b'/') {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH").unwrap_or_else(|| "/usr/bin:/bin".into());
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|full| is_executable(full))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
