//! File I/O syscalls: the whitelisted read-only surface plus the stdout
//! write path.

use std::ffi::CString;

use crate::abi::{GuestIoVec, GuestPod, GuestPollFd};
use crate::error::Trap;
use crate::fdtable;

use super::SyscallEnv;

impl SyscallEnv {
    /// `open(pathPtr, flags, mode)`. Only whitelisted paths, only read-only.
    pub fn open(&self, path_ptr: u32, flags: i32, mode: i32) -> Result<i32, Trap> {
        tracing::debug!(path_ptr, flags, mode, "open");

        if mode != 0 {
            tracing::error!(mode, "attempt to open in non-read-only mode");
            return Err(Trap::NonReadOnlyOpen(mode));
        }

        let guest_path = self.memory.read_cstr(path_ptr)?;
        let Some(host_path) = self.whitelist.resolve(&guest_path) else {
            tracing::error!(path = %guest_path, "trying to open blocked path");
            return Err(Trap::BlockedPath(guest_path));
        };

        tracing::debug!(path = %guest_path, host = %host_path.display(), "opening whitelisted file");
        let c_path = CString::new(host_path.to_string_lossy().into_owned())
            .map_err(|_| Trap::BlockedPath(guest_path.clone()))?;
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY) };
        if fd < 0 {
            tracing::error!(path = %guest_path, "host-side open failed");
            return Err(Trap::HostOpen(guest_path));
        }

        fdtable::insert(fd);
        Ok(fd)
    }

    /// `read(fd, bufPtr, count)` into guest memory.
    pub fn read(&self, fd: i32, buf_ptr: u32, count: u32) -> Result<i32, Trap> {
        tracing::debug!(fd, buf_ptr, count, "read");
        fdtable::check(fd)?;
        self.memory.check_range(buf_ptr, count)?;

        let mut buf = vec![0u8; count as usize];
        let bytes_read =
            unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, count as usize) };
        if bytes_read > 0 {
            self.memory
                .write_bytes(buf_ptr, &buf[..bytes_read as usize])?;
        }
        Ok(bytes_read as i32)
    }

    /// `close(fd)`.
    pub fn close(&self, fd: i32) -> Result<i32, Trap> {
        tracing::debug!(fd, "close");
        fdtable::check(fd)?;
        fdtable::remove(fd);
        unsafe { libc::close(fd) };
        Ok(0)
    }

    /// `fcntl64(fd, cmd, arg)`: descriptor flag juggling is irrelevant for
    /// a read-only sandbox, so this is a checked no-op.
    pub fn fcntl64(&self, fd: i32, cmd: i32, arg: i32) -> Result<i32, Trap> {
        tracing::debug!(fd, cmd, arg, "fcntl64");
        fdtable::check(fd)?;
        Ok(0)
    }

    /// `poll(fdsPtr, nfds, timeout)` over exactly one descriptor.
    pub fn poll(&self, fds_ptr: u32, nfds: i32, timeout: i32) -> Result<i32, Trap> {
        tracing::debug!(fds_ptr, nfds, timeout, "poll");

        if nfds != 1 {
            tracing::error!(nfds, "only single-fd poll is supported");
            return Err(Trap::MultiFdPoll(nfds));
        }

        let shadow: GuestPollFd = self.memory.read_pod(fds_ptr)?;
        fdtable::check(shadow.fd)?;

        let mut native = shadow.to_native();
        let res = unsafe { libc::poll(&mut native, 1, timeout) };

        self.memory.write_pod(
            fds_ptr,
            &GuestPollFd {
                fd: shadow.fd,
                events: shadow.events,
                revents: native.revents,
            },
        )?;
        Ok(res)
    }

    /// `writev(fd, iovPtr, iovcnt)`.
    ///
    /// The guest's fd argument is ignored and output always goes to host
    /// stdout: the guest holds no arbitrary-write capability.
    pub fn writev(&self, fd: i32, iov_ptr: u32, iovcnt: i32) -> Result<i32, Trap> {
        tracing::debug!(fd, iov_ptr, iovcnt, "writev");

        let mut buffers = Vec::with_capacity(iovcnt.max(0) as usize);
        for i in 0..iovcnt.max(0) as u32 {
            let entry: GuestIoVec = self
                .memory
                .read_pod(iov_ptr + i * GuestIoVec::SIZE as u32)?;
            buffers.push(self.memory.read_bytes(entry.base, entry.len)?);
        }

        let native: Vec<libc::iovec> = buffers
            .iter()
            .map(|b| libc::iovec {
                iov_base: b.as_ptr() as *mut libc::c_void,
                iov_len: b.len(),
            })
            .collect();

        let written = unsafe {
            libc::writev(libc::STDOUT_FILENO, native.as_ptr(), native.len() as libc::c_int)
        };
        Ok(written as i32)
    }

    /// `ioctl(a, b, c)`: stub.
    pub fn ioctl(&self, a: i32, b: i32, c: i32) -> Result<i32, Trap> {
        tracing::debug!(a, b, c, "ioctl");
        Ok(0)
    }

    /// `__syscall_ioctl(fd, request, argPtr, d, e, f)`: stub.
    pub fn ioctl6(&self, fd: i32, request: i32, arg_ptr: i32, d: i32, e: i32, f: i32) -> Result<i32, Trap> {
        tracing::debug!(fd, request, arg_ptr, d, e, f, "ioctl");
        Ok(0)
    }

    /// `puts(strPtr)`: echo a guest string to host stdout.
    pub fn puts(&self, str_ptr: u32) -> Result<i32, Trap> {
        let string = self.memory.read_cstr(str_ptr)?;
        tracing::debug!(len = string.len(), "puts");
        println!("{string}");
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use crate::fdtable;
    use crate::memory::MemoryView;
    use crate::mock::HeapMemory;
    use crate::whitelist::PathWhitelist;

    use super::super::SyscallEnv;
    use crate::error::Trap;

    fn env_with(whitelist: PathWhitelist) -> SyscallEnv {
        let memory = MemoryView::new(Arc::new(HeapMemory::new(2, 16)));
        SyscallEnv::new(memory, whitelist)
    }

    fn write_guest_path(env: &SyscallEnv, at: u32, path: &str) {
        let mut bytes = path.as_bytes().to_vec();
        bytes.push(0);
        env.memory().write_bytes(at, &bytes).unwrap();
    }

    #[test]
    fn open_read_close_whitelisted_file() {
        fdtable::clear();
        let mut host_file = tempfile::NamedTempFile::new().unwrap();
        host_file.write_all(b"127.0.0.1 localhost\n").unwrap();

        let env = env_with(PathWhitelist::empty().with_entry("/etc/hosts", host_file.path()));
        write_guest_path(&env, 64, "/etc/hosts");

        let fd = env.open(64, 0, 0).unwrap();
        assert!(fd >= 0);

        let n = env.read(fd, 1024, 16).unwrap();
        assert_eq!(n, 16);
        assert_eq!(
            env.memory().read_bytes(1024, 16).unwrap(),
            b"127.0.0.1 localh"
        );

        assert_eq!(env.close(fd).unwrap(), 0);
        assert!(matches!(env.read(fd, 1024, 4), Err(Trap::FdNotOwned(_))));
    }

    #[test]
    fn open_blocked_path_traps() {
        fdtable::clear();
        let env = env_with(PathWhitelist::empty());
        write_guest_path(&env, 64, "/etc/passwd");
        assert!(matches!(env.open(64, 0, 0), Err(Trap::BlockedPath(_))));
    }

    #[test]
    fn open_writable_mode_traps() {
        fdtable::clear();
        let host_file = tempfile::NamedTempFile::new().unwrap();
        let env = env_with(PathWhitelist::empty().with_entry("/etc/hosts", host_file.path()));
        write_guest_path(&env, 64, "/etc/hosts");
        assert!(matches!(env.open(64, 0, 0o644), Err(Trap::NonReadOnlyOpen(_))));
    }

    #[test]
    fn fd_checked_calls_trap_on_unowned_fd() {
        fdtable::clear();
        let env = env_with(PathWhitelist::empty());
        assert!(matches!(env.read(33, 0, 4), Err(Trap::FdNotOwned(33))));
        assert!(matches!(env.close(33), Err(Trap::FdNotOwned(33))));
        assert!(matches!(env.fcntl64(33, 0, 0), Err(Trap::FdNotOwned(33))));
    }

    #[test]
    fn poll_rejects_multiple_fds() {
        fdtable::clear();
        let env = env_with(PathWhitelist::empty());
        assert!(matches!(env.poll(0, 2, 0), Err(Trap::MultiFdPoll(2))));
        assert!(matches!(env.poll(0, 0, 0), Err(Trap::MultiFdPoll(0))));
    }

    #[test]
    fn poll_checks_ownership_of_the_single_fd() {
        fdtable::clear();
        let env = env_with(PathWhitelist::empty());
        // pollfd { fd: 44, events: POLLIN, revents: 0 } at offset 0
        env.memory().write_i32(0, 44).unwrap();
        assert!(matches!(env.poll(0, 1, 0), Err(Trap::FdNotOwned(44))));
    }

    #[test]
    fn writev_gathers_guest_buffers() {
        fdtable::clear();
        let env = env_with(PathWhitelist::empty());
        let mem = env.memory();
        mem.write_bytes(512, b"hello ").unwrap();
        mem.write_bytes(600, b"world\n").unwrap();
        // two iovec entries at offset 0: (512, 6), (600, 6)
        mem.write_i32(0, 512).unwrap();
        mem.write_i32(4, 6).unwrap();
        mem.write_i32(8, 600).unwrap();
        mem.write_i32(12, 6).unwrap();

        // the guest fd argument is ignored; 1234 still writes to host stdout
        let written = env.writev(1234, 0, 2).unwrap();
        assert_eq!(written, 12);
    }

    #[test]
    fn unsupported_syscalls_trap() {
        let env = env_with(PathWhitelist::empty());
        for name in ["readv", "llseek", "futex", "fstat64", "stat64", "access"] {
            assert!(matches!(
                env.unsupported(name, &[0, 0, 0]),
                Err(Trap::UnsupportedSyscall(_))
            ));
        }
    }
}
