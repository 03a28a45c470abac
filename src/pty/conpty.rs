//! Windows ConPTY backend.
//!
//! A pseudo-console is allocated over two pipes: we write child input into
//! one, ConPTY renders child output into the other. Unlike a Unix PTY the
//! pseudo-console is an interpreting intermediary: it parses the escape
//! stream and emits device-status queries of its own, which is why the
//! relay runs the query scanner on this backend.
//!
//! The `HPCON` must stay open until the output direction has drained;
//! closing it early makes ConPTY discard the child's queued output.

use std::io;
use std::sync::Mutex;

use tracing::debug;
use windows::core::{HRESULT, PCWSTR, PWSTR};
use windows::Win32::Foundation::{
    CloseHandle, ERROR_BROKEN_PIPE, ERROR_OPERATION_ABORTED, HANDLE,
};
use windows::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows::Win32::System::Console::{
    ClosePseudoConsole, CreatePseudoConsole, ResizePseudoConsole, COORD, HPCON,
};
use windows::Win32::System::Pipes::CreatePipe;
use windows::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, InitializeProcThreadAttributeList,
    UpdateProcThreadAttribute, EXTENDED_STARTUPINFO_PRESENT, LPPROC_THREAD_ATTRIBUTE_LIST,
    PROCESS_INFORMATION, STARTUPINFOEXW,
};
use windows::Win32::System::IO::CancelIoEx;

use crate::error::{Error, Result};
use crate::pty::PtySize;

const PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE: usize = 0x00020016;

pub struct Pty {
    /// Closed exactly once during teardown, after the output drain.
    hpc: Mutex<Option<HPCON>>,
    input_write: HANDLE,
    output_read: HANDLE,
    process: Option<PROCESS_INFORMATION>,
}

// Safety: the pipe handles are used from the relay worker threads, the
// HPCON is guarded by the mutex, and the process handles only from the
// session thread.
unsafe impl Send for Pty {}
unsafe impl Sync for Pty {}

impl Pty {
    /// ConPTY parses the stream and emits its own status queries; the
    /// relay must answer them or the hosted session stalls.
    pub const INTERPRETS_STREAM: bool = true;

    pub fn open(size: PtySize) -> Result<Self> {
        let alloc_err = |e: windows::core::Error| Error::Allocation(e.to_string());

        let mut pty_input_read = HANDLE::default();
        let mut pty_input_write = HANDLE::default();
        let mut pty_output_read = HANDLE::default();
        let mut pty_output_write = HANDLE::default();

        unsafe {
            // Input pipe (we write, ConPTY reads).
            CreatePipe(&mut pty_input_read, &mut pty_input_write, None, 0).map_err(alloc_err)?;
            // Output pipe (ConPTY writes, we read).
            CreatePipe(&mut pty_output_read, &mut pty_output_write, None, 0).map_err(alloc_err)?;

            let coord = COORD {
                X: size.cols as i16,
                Y: size.rows as i16,
            };
            let hpc = CreatePseudoConsole(coord, pty_input_read, pty_output_write, 0)
                .map_err(alloc_err)?;

            // ConPTY now owns these pipe ends; close our copies.
            let _ = CloseHandle(pty_input_read);
            let _ = CloseHandle(pty_output_write);

            Ok(Self {
                hpc: Mutex::new(Some(hpc)),
                input_write: pty_input_write,
                output_read: pty_output_read,
                process: None,
            })
        }
    }

    /// Launch the child attached to the pseudo-console. On failure the
    /// caller still owns the console and pipes and must release them
    /// (dropping the `Pty` does).
    pub fn spawn(&mut self, command: &str, args: &[String], _term: &str) -> Result<u32> {
        let launch_err = |e: windows::core::Error| Error::Launch {
            command: command.to_string(),
            reason: e.to_string(),
        };
        let hpc = self
            .hpc
            .lock()
            .ok()
            .and_then(|guard| *guard)
            .ok_or_else(|| Error::Launch {
                command: command.to_string(),
                reason: "pseudo-console already released".to_string(),
            })?;

        // Single command line, argv joined with spaces.
        let mut cmd_line = command.to_string();
        for arg in args {
            cmd_line.push(' ');
            cmd_line.push_str(arg);
        }
        let mut cmd_wide: Vec<u16> = cmd_line.encode_utf16().chain(std::iter::once(0)).collect();

        unsafe {
            // Attribute list attaching the child to our pseudo-console
            // instead of the real console.
            let mut attr_list_size: usize = 0;
            let _ = InitializeProcThreadAttributeList(
                LPPROC_THREAD_ATTRIBUTE_LIST::default(),
                1,
                0,
                &mut attr_list_size,
            );
            let mut attr_list_buffer = vec![0u8; attr_list_size];
            let attr_list = LPPROC_THREAD_ATTRIBUTE_LIST(attr_list_buffer.as_mut_ptr() as *mut _);
            InitializeProcThreadAttributeList(attr_list, 1, 0, &mut attr_list_size)
                .map_err(launch_err)?;
            UpdateProcThreadAttribute(
                attr_list,
                0,
                PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
                Some(hpc.0 as *const _),
                std::mem::size_of::<HPCON>(),
                None,
                None,
            )
            .map_err(launch_err)?;

            let mut startup_info = STARTUPINFOEXW {
                StartupInfo: std::mem::zeroed(),
                lpAttributeList: attr_list,
            };
            startup_info.StartupInfo.cb = std::mem::size_of::<STARTUPINFOEXW>() as u32;

            let mut process_info = PROCESS_INFORMATION::default();
            let created = CreateProcessW(
                PCWSTR::null(),
                PWSTR(cmd_wide.as_mut_ptr()),
                None,
                None,
                false,
                EXTENDED_STARTUPINFO_PRESENT,
                None,
                PCWSTR::null(),
                &startup_info.StartupInfo,
                &mut process_info,
            );
            DeleteProcThreadAttributeList(attr_list);
            created.map_err(launch_err)?;

            debug!(pid = process_info.dwProcessId, command, "child launched");
            self.process = Some(process_info);
            Ok(process_info.dwProcessId)
        }
    }

    /// Propagate a new window size, best effort.
    pub fn resize(&self, size: PtySize) {
        let coord = COORD {
            X: size.cols as i16,
            Y: size.rows as i16,
        };
        if let Ok(guard) = self.hpc.lock() {
            if let Some(hpc) = *guard {
                unsafe {
                    let _ = ResizePseudoConsole(hpc, coord);
                }
            }
        }
    }

    /// Blocking read of child output. Returns `Ok(0)` on end-of-stream:
    /// a broken pipe (console released, child gone) or a canceled read.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut read: u32 = 0;
        unsafe {
            match ReadFile(self.output_read, Some(buf), Some(&mut read), None) {
                Ok(()) => Ok(read as usize),
                Err(e) if e.code() == HRESULT::from_win32(ERROR_BROKEN_PIPE.0) => Ok(0),
                Err(e) if e.code() == HRESULT::from_win32(ERROR_OPERATION_ABORTED.0) => Ok(0),
                Err(e) => Err(io::Error::from_raw_os_error(e.code().0 as i32)),
            }
        }
    }

    /// Write into the child's input channel.
    pub fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let mut written: u32 = 0;
            unsafe {
                WriteFile(self.input_write, Some(buf), Some(&mut written), None)
                    .map_err(|e| io::Error::from_raw_os_error(e.code().0 as i32))?;
            }
            buf = &buf[written as usize..];
        }
        Ok(())
    }

    /// Close the pseudo-console. ConPTY then closes its pipe ends, which
    /// breaks the output reader's blocking `ReadFile`. Idempotent; must
    /// only be called after the output direction has drained or as part of
    /// final teardown.
    pub fn release(&self) {
        if let Ok(mut guard) = self.hpc.lock() {
            if let Some(hpc) = guard.take() {
                unsafe { ClosePseudoConsole(hpc) };
            }
        }
    }

    /// Unblock a pending output read without closing anything.
    pub fn cancel_output(&self) {
        unsafe {
            let _ = CancelIoEx(self.output_read, None);
        }
    }

    pub fn process_handle(&self) -> Option<HANDLE> {
        self.process.as_ref().map(|p| p.hProcess)
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        self.release();
        unsafe {
            let _ = CloseHandle(self.input_write);
            let _ = CloseHandle(self.output_read);
            if let Some(process) = self.process.take() {
                let _ = CloseHandle(process.hProcess);
                let _ = CloseHandle(process.hThread);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_and_release() {
        let pty = Pty::open(PtySize::default()).unwrap();
        pty.release();
        // Idempotent.
        pty.release();
    }

    #[test]
    fn spawn_echo() {
        let mut pty = Pty::open(PtySize::default()).unwrap();
        let pid = pty.spawn("cmd.exe", &["/c".into(), "echo hello".into()], "").unwrap();
        assert!(pid != 0);
    }
}
