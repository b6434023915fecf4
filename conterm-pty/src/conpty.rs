//! Windows pseudo console backend
//!
//! ConPTY only talks through anonymous pipes, which cannot be read without
//! blocking. The pipes are handed to a [`Bridge`] that forwards them onto a
//! loopback socket; the session reads and writes the other, non-blocking end.
//!
//! The pseudo console entry points are resolved at runtime so that a kernel32
//! without them produces an error instead of a loader failure.

use std::ffi::c_void;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::thread;
use std::time::Duration;

use windows::core::{s, w, HRESULT, PCWSTR, PWSTR};
use windows::Win32::Foundation::{HANDLE, WAIT_OBJECT_0};
use windows::Win32::System::Console::{COORD, HPCON};
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows::Win32::System::Pipes::CreatePipe;
use windows::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, GetExitCodeProcess,
    InitializeProcThreadAttributeList, TerminateProcess, UpdateProcThreadAttribute,
    WaitForSingleObject, CREATE_UNICODE_ENVIRONMENT, EXTENDED_STARTUPINFO_PRESENT,
    LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_INFORMATION, STARTUPINFOEXW,
};
use windows::Win32::System::IO::CancelSynchronousIo;

use crate::bridge::{self, Bridge};
use crate::command::CommandSpec;
use crate::error::{Error, Result};
use crate::pty::{ChildExit, Pty};
use crate::size::WindowSize;

const PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE: usize = 0x0002_0016;

/// `GetExitCodeProcess` value for a process that is still running
const STILL_ACTIVE: u32 = 259;

/// How long close waits for a terminated child
const TERMINATE_WAIT_MS: u32 = 1000;

/// Attempts to unblock the outbound thread's pipe read on close
const CANCEL_ATTEMPTS: usize = 20;

type CreatePseudoConsoleFn =
    unsafe extern "system" fn(COORD, HANDLE, HANDLE, u32, *mut HPCON) -> HRESULT;
type ResizePseudoConsoleFn = unsafe extern "system" fn(HPCON, COORD) -> HRESULT;
type ClosePseudoConsoleFn = unsafe extern "system" fn(HPCON);

/// Pseudo console functions looked up in kernel32
#[derive(Clone, Copy)]
struct PseudoConsoleApi {
    create: CreatePseudoConsoleFn,
    resize: ResizePseudoConsoleFn,
    close: ClosePseudoConsoleFn,
}

impl PseudoConsoleApi {
    fn load() -> Result<Self> {
        let missing = |name: &str| {
            Error::UnsupportedPlatform(format!("kernel32 does not export {}", name))
        };
        unsafe {
            let kernel32 = GetModuleHandleW(w!("kernel32.dll"))
                .map_err(|_| Error::UnsupportedPlatform("kernel32.dll not loaded".into()))?;
            let create = GetProcAddress(kernel32, s!("CreatePseudoConsole"))
                .ok_or_else(|| missing("CreatePseudoConsole"))?;
            let resize = GetProcAddress(kernel32, s!("ResizePseudoConsole"))
                .ok_or_else(|| missing("ResizePseudoConsole"))?;
            let close = GetProcAddress(kernel32, s!("ClosePseudoConsole"))
                .ok_or_else(|| missing("ClosePseudoConsole"))?;
            Ok(Self {
                create: std::mem::transmute::<_, CreatePseudoConsoleFn>(create),
                resize: std::mem::transmute::<_, ResizePseudoConsoleFn>(resize),
                close: std::mem::transmute::<_, ClosePseudoConsoleFn>(close),
            })
        }
    }
}

/// Buffer holding a process attribute list that attaches a pseudo console
struct AttributeList {
    buffer: Vec<usize>,
}

impl AttributeList {
    fn with_pseudo_console(hpc: &HPCON) -> windows::core::Result<Self> {
        let mut size = 0usize;
        unsafe {
            // The first call only reports the required size and always fails
            let _ = InitializeProcThreadAttributeList(
                LPPROC_THREAD_ATTRIBUTE_LIST::default(),
                1,
                0,
                &mut size,
            );
        }
        let words = size.div_ceil(std::mem::size_of::<usize>());
        let mut list = Self {
            buffer: vec![0usize; words.max(1)],
        };
        unsafe {
            InitializeProcThreadAttributeList(list.as_raw(), 1, 0, &mut size)?;
            let attached = UpdateProcThreadAttribute(
                list.as_raw(),
                0,
                PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
                Some(hpc.0 as *const c_void),
                std::mem::size_of::<HPCON>(),
                None,
                None,
            );
            if let Err(e) = attached {
                DeleteProcThreadAttributeList(list.as_raw());
                list.buffer.clear();
                return Err(e);
            }
        }
        Ok(list)
    }

    fn as_raw(&mut self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        LPPROC_THREAD_ATTRIBUTE_LIST(self.buffer.as_mut_ptr().cast())
    }
}

impl Drop for AttributeList {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            unsafe { DeleteProcThreadAttributeList(self.as_raw()) };
        }
    }
}

/// A child process attached to a Windows pseudo console
pub struct ConPty {
    api: PseudoConsoleApi,
    hpc: HPCON,
    process: Option<OwnedHandle>,
    thread: Option<OwnedHandle>,
    pid: u32,
    consumer: Option<TcpStream>,
    bridge: Option<Bridge>,
    size: WindowSize,
    exit: Option<ChildExit>,
    closed: bool,
}

// HPCON is an opaque handle usable from any thread
unsafe impl Send for ConPty {}

impl ConPty {
    /// Create a pseudo console of `size` and run `command` inside it
    pub fn spawn(command: &CommandSpec, size: WindowSize) -> Result<Self> {
        let api = PseudoConsoleApi::load()?;
        let size = size.clamped();
        let program = command.display_program();

        let (input_read, input_write) = pipe().map_err(|e| Error::resource("input pipe", e))?;
        let (output_read, output_write) =
            pipe().map_err(|e| Error::resource("output pipe", e))?;

        let mut hpc = HPCON::default();
        unsafe {
            (api.create)(
                coord(size),
                raw(&input_read),
                raw(&output_write),
                0,
                &mut hpc,
            )
            .ok()
            .map_err(|e| Error::resource("pseudo console", e))?;
        }

        let spawned = spawn_attached(command, &hpc).map_err(|e| Error::spawn(&program, e));
        // The pseudo console holds its own references to its pipe ends
        drop(input_read);
        drop(output_write);
        let info = match spawned {
            Ok(info) => info,
            Err(e) => {
                unsafe { (api.close)(hpc) };
                return Err(e);
            }
        };
        let process = unsafe { OwnedHandle::from_raw_handle(info.hProcess.0 as RawHandle) };
        let thread = unsafe { OwnedHandle::from_raw_handle(info.hThread.0 as RawHandle) };

        let mut pty = Self {
            api,
            hpc,
            process: Some(process),
            thread: Some(thread),
            pid: info.dwProcessId,
            consumer: None,
            bridge: None,
            size,
            exit: None,
            closed: false,
        };

        let (consumer, bridge_side) =
            bridge::socket_pair().map_err(|e| Error::resource("loopback socket pair", e))?;
        let bridge = Bridge::start(File::from(output_read), File::from(input_write), bridge_side)
            .map_err(|e| Error::resource("bridge threads", e))?;
        pty.consumer = Some(consumer);
        pty.bridge = Some(bridge);

        log::debug!("spawned {} as pid {} in a {}x{} pseudo console", program, pty.pid, size.cols, size.rows);
        Ok(pty)
    }

    fn process_handle(&self) -> Option<HANDLE> {
        self.process.as_ref().map(|h| HANDLE(h.as_raw_handle() as _))
    }

    fn consumer(&mut self) -> io::Result<&mut TcpStream> {
        self.consumer
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }

    /// Unblock the outbound thread if it is parked in `ReadFile`
    fn cancel_outbound_read(&self) {
        let Some(bridge) = self.bridge.as_ref() else {
            return;
        };
        for _ in 0..CANCEL_ATTEMPTS {
            let Some(handle) = bridge.outbound_thread() else {
                return;
            };
            if handle.is_finished() {
                return;
            }
            unsafe {
                let _ = CancelSynchronousIo(HANDLE(handle.as_raw_handle() as _));
            }
            thread::sleep(Duration::from_millis(5));
        }
        log::debug!("outbound bridge thread still busy after cancellation");
    }

    fn terminate_child(&mut self) {
        let Some(process) = self.process_handle() else {
            return;
        };
        if matches!(self.try_wait(), Ok(Some(_))) {
            return;
        }
        unsafe {
            let _ = TerminateProcess(process, 1);
            if WaitForSingleObject(process, TERMINATE_WAIT_MS) != WAIT_OBJECT_0 {
                log::warn!("pid {} did not exit after TerminateProcess", self.pid);
            }
        }
        let _ = self.try_wait();
    }
}

impl Pty for ConPty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.consumer.as_mut() {
            Some(consumer) => consumer.read(buf),
            None => Ok(0),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.consumer()?.write(buf)
    }

    fn resize(&mut self, size: WindowSize) -> Result<()> {
        if self.closed {
            return Err(Error::Resize {
                cols: size.cols,
                rows: size.rows,
                source: io::ErrorKind::NotConnected.into(),
            });
        }
        unsafe { (self.api.resize)(self.hpc, coord(size)) }
            .ok()
            .map_err(|e| Error::Resize {
                cols: size.cols,
                rows: size.rows,
                source: e.into(),
            })?;
        self.size = size;
        Ok(())
    }

    fn window_size(&self) -> Result<WindowSize> {
        // There is no query call; the last size applied is authoritative
        Ok(self.size)
    }

    fn process_id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_wait(&mut self) -> Result<Option<ChildExit>> {
        if self.exit.is_some() {
            return Ok(self.exit);
        }
        let Some(process) = self.process_handle() else {
            return Ok(None);
        };
        unsafe {
            if WaitForSingleObject(process, 0) != WAIT_OBJECT_0 {
                return Ok(None);
            }
            let mut code = 0u32;
            GetExitCodeProcess(process, &mut code)
                .map_err(|e| Error::channel("wait", e.into()))?;
            if code != STILL_ACTIVE {
                self.exit = Some(ChildExit::Exited(code as i32));
            }
        }
        Ok(self.exit)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(bridge) = self.bridge.as_ref() {
            bridge.request_stop();
        }
        self.cancel_outbound_read();
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.join_finished();
        }
        self.consumer = None;
        self.terminate_child();
        unsafe { (self.api.close)(self.hpc) };
        // Closing the pseudo console breaks the output pipe, so whatever the
        // outbound thread was blocked on has returned by now
        if let Some(mut bridge) = self.bridge.take() {
            bridge.join();
        }
        self.thread = None;
        self.process = None;
        log::debug!("pseudo console for pid {} closed ({:?})", self.pid, self.exit);
        Ok(())
    }
}

impl Drop for ConPty {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("error closing pseudo console: {}", e);
        }
    }
}

fn pipe() -> windows::core::Result<(OwnedHandle, OwnedHandle)> {
    let mut read = HANDLE::default();
    let mut write = HANDLE::default();
    unsafe {
        CreatePipe(&mut read, &mut write, None, 0)?;
        Ok((
            OwnedHandle::from_raw_handle(read.0 as RawHandle),
            OwnedHandle::from_raw_handle(write.0 as RawHandle),
        ))
    }
}

fn raw(handle: &OwnedHandle) -> HANDLE {
    HANDLE(handle.as_raw_handle() as _)
}

fn coord(size: WindowSize) -> COORD {
    let clamp = |v: u16| v.clamp(1, i16::MAX as u16) as i16;
    COORD {
        X: clamp(size.cols),
        Y: clamp(size.rows),
    }
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Sorted, double-NUL terminated UTF-16 environment block
fn environment_block(command: &CommandSpec) -> Vec<u16> {
    let mut vars: Vec<(String, String)> = command
        .environment()
        .into_iter()
        .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
        .collect();
    vars.sort_by_key(|(k, _)| k.to_uppercase());

    let mut block = Vec::new();
    for (key, value) in vars {
        block.extend(format!("{}={}", key, value).encode_utf16());
        block.push(0);
    }
    block.push(0);
    block
}

fn spawn_attached(command: &CommandSpec, hpc: &HPCON) -> windows::core::Result<PROCESS_INFORMATION> {
    let mut attributes = AttributeList::with_pseudo_console(hpc)?;
    let mut command_line = wide(&command.command_line());
    let environment = environment_block(command);
    let cwd = command
        .working_dir()
        .map(|dir| wide(&dir.to_string_lossy()));

    let mut startup = STARTUPINFOEXW::default();
    startup.StartupInfo.cb = std::mem::size_of::<STARTUPINFOEXW>() as u32;
    startup.lpAttributeList = attributes.as_raw();

    let mut info = PROCESS_INFORMATION::default();
    unsafe {
        CreateProcessW(
            PCWSTR::null(),
            PWSTR(command_line.as_mut_ptr()),
            None,
            None,
            false,
            EXTENDED_STARTUPINFO_PRESENT | CREATE_UNICODE_ENVIRONMENT,
            Some(environment.as_ptr().cast()),
            cwd.as_ref()
                .map_or(PCWSTR::null(), |dir| PCWSTR(dir.as_ptr())),
            &startup.StartupInfo,
            &mut info,
        )?;
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_block_is_sorted_and_terminated() {
        let block = environment_block(&CommandSpec::new("cmd.exe").env("ZZZ", "1").env("aaa", "2"));
        assert_eq!(&block[block.len() - 2..], &[0, 0]);
        let text = String::from_utf16_lossy(&block);
        let a = text.find("aaa=2").unwrap();
        let z = text.find("ZZZ=1").unwrap();
        assert!(a < z);
    }

    #[test]
    fn test_coord_clamps() {
        let c = coord(WindowSize::new(0, 40000));
        assert_eq!((c.X, c.Y), (1, i16::MAX));
    }

    #[test]
    fn test_spawn_echo() {
        let command = CommandSpec::new("cmd.exe").args(["/c", "echo hello"]);
        let mut pty = ConPty::spawn(&command, WindowSize::default()).unwrap();
        let mut output = Vec::new();
        let mut buf = [0u8; 1024];
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while std::time::Instant::now() < deadline
            && !String::from_utf8_lossy(&output).contains("hello")
        {
            match pty.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => output.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10))
                }
                Err(e) => panic!("read failed: {}", e),
            }
        }
        assert!(String::from_utf8_lossy(&output).contains("hello"));
        pty.close().unwrap();
        pty.close().unwrap();
    }
}
