//! Socket syscalls, multiplexed through `socketcall`.
//!
//! Policy: client-only. Functions run in their own network namespace when
//! properly isolated, so the client half of the socket API passes through to
//! the kernel once descriptor ownership is established. The server half
//! (`listen`, `accept`) traps.

use std::mem;

use crate::abi::{GuestPod, GuestSockAddr};
use crate::error::Trap;
use crate::fdtable;

use super::SyscallEnv;

/// Sub-operation codes carried in the first argument of `socketcall`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SocketCall {
    Socket = 1,
    Bind = 2,
    Connect = 3,
    Listen = 4,
    Accept = 5,
    GetSockName = 6,
    GetPeerName = 7,
    SocketPair = 8,
    Send = 9,
    Recv = 10,
    SendTo = 11,
    RecvFrom = 12,
    Shutdown = 13,
    SetSockOpt = 14,
    GetSockOpt = 15,
    SendMsg = 16,
    RecvMsg = 17,
    Accept4 = 18,
    RecvMmsg = 19,
    SendMmsg = 20,
}

impl SocketCall {
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            1 => Self::Socket,
            2 => Self::Bind,
            3 => Self::Connect,
            4 => Self::Listen,
            5 => Self::Accept,
            6 => Self::GetSockName,
            7 => Self::GetPeerName,
            8 => Self::SocketPair,
            9 => Self::Send,
            10 => Self::Recv,
            11 => Self::SendTo,
            12 => Self::RecvFrom,
            13 => Self::Shutdown,
            14 => Self::SetSockOpt,
            15 => Self::GetSockOpt,
            16 => Self::SendMsg,
            17 => Self::RecvMsg,
            18 => Self::Accept4,
            19 => Self::RecvMmsg,
            20 => Self::SendMmsg,
            _ => return None,
        })
    }
}

impl SyscallEnv {
    /// `socketcall(op, argsPtr)`: `argsPtr` addresses a packed array of
    /// 32-bit words in guest memory, one per sub-operation argument.
    pub fn socketcall(&self, call: i32, args_ptr: u32) -> Result<i32, Trap> {
        let Some(op) = SocketCall::from_raw(call) else {
            tracing::warn!(call, "unrecognised socketcall");
            return Ok(0);
        };

        match op {
            SocketCall::Socket => self.sc_socket(args_ptr),
            SocketCall::Connect => self.sc_connect(args_ptr),
            SocketCall::Bind => self.sc_bind(args_ptr),
            SocketCall::Send | SocketCall::Recv | SocketCall::SendTo | SocketCall::RecvFrom => {
                self.sc_transfer(op, args_ptr)
            }
            SocketCall::GetSockName => self.sc_getsockname(args_ptr),

            // Server-side operations; functions are clients only.
            SocketCall::Listen | SocketCall::Accept => {
                let name = if op == SocketCall::Listen { "listen" } else { "accept" };
                tracing::error!(name, "server-side socket operation");
                Err(Trap::ServerSocketOp(name))
            }

            // Unfinished surface, stubbed.
            SocketCall::GetPeerName
            | SocketCall::SocketPair
            | SocketCall::Shutdown
            | SocketCall::SetSockOpt
            | SocketCall::GetSockOpt
            | SocketCall::SendMsg
            | SocketCall::RecvMsg
            | SocketCall::Accept4
            | SocketCall::RecvMmsg
            | SocketCall::SendMmsg => {
                tracing::debug!(?op, args_ptr, "stubbed socketcall");
                Ok(0)
            }
        }
    }

    fn sc_socket(&self, args_ptr: u32) -> Result<i32, Trap> {
        let args = self.memory.read_u32s(args_ptr, 3)?;
        let (domain, ty, protocol) = (args[0] as i32, args[1] as i32, args[2] as i32);
        tracing::debug!(domain, ty, protocol, "socket");

        let sock = unsafe { libc::socket(domain, ty, protocol) };
        if sock >= 0 {
            fdtable::insert(sock);
        }
        Ok(sock)
    }

    fn sc_connect(&self, args_ptr: u32) -> Result<i32, Trap> {
        let args = self.memory.read_u32s(args_ptr, 3)?;
        let (sockfd, addr_ptr, addr_len) = (args[0] as i32, args[1], args[2]);
        tracing::debug!(sockfd, addr_ptr, addr_len, "connect");

        fdtable::check(sockfd)?;
        let addr: GuestSockAddr = self.memory.read_pod(addr_ptr)?;
        let native = addr.to_native();
        let res = unsafe {
            libc::connect(
                sockfd,
                &native,
                mem::size_of::<libc::sockaddr>() as libc::socklen_t,
            )
        };
        Ok(res)
    }

    fn sc_bind(&self, args_ptr: u32) -> Result<i32, Trap> {
        let args = self.memory.read_u32s(args_ptr, 3)?;
        let (sockfd, addr_ptr, addr_len) = (args[0] as i32, args[1], args[2]);
        tracing::debug!(sockfd, addr_ptr, addr_len, "bind");

        fdtable::check(sockfd)?;
        let addr: GuestSockAddr = self.memory.read_pod(addr_ptr)?;
        let native = addr.to_native();
        let res = unsafe {
            libc::bind(
                sockfd,
                &native,
                mem::size_of::<libc::sockaddr>() as libc::socklen_t,
            )
        };
        Ok(res)
    }

    /// `send`, `recv`, `sendto`, `recvfrom`: same argument prefix, with the
    /// to/from variants carrying a trailing sockaddr pointer and length.
    fn sc_transfer(&self, op: SocketCall, args_ptr: u32) -> Result<i32, Trap> {
        let arg_count = match op {
            SocketCall::SendTo | SocketCall::RecvFrom => 6,
            _ => 4,
        };
        let args = self.memory.read_u32s(args_ptr, arg_count)?;
        let (sockfd, buf_ptr, buf_len, flags) =
            (args[0] as i32, args[1], args[2], args[3] as i32);

        fdtable::check(sockfd)?;
        self.memory.check_range(buf_ptr, buf_len)?;

        match op {
            SocketCall::Send => {
                tracing::debug!(sockfd, buf_ptr, buf_len, flags, "send");
                let buf = self.memory.read_bytes(buf_ptr, buf_len)?;
                let res = unsafe {
                    libc::send(sockfd, buf.as_ptr() as *const libc::c_void, buf.len(), flags)
                };
                Ok(res as i32)
            }
            SocketCall::Recv => {
                tracing::debug!(sockfd, buf_ptr, buf_len, flags, "recv");
                let mut buf = vec![0u8; buf_len as usize];
                let res = unsafe {
                    libc::recv(
                        sockfd,
                        buf.as_mut_ptr() as *mut libc::c_void,
                        buf.len(),
                        flags,
                    )
                };
                if res > 0 {
                    self.memory.write_bytes(buf_ptr, &buf[..res as usize])?;
                }
                Ok(res as i32)
            }
            SocketCall::SendTo => {
                let (addr_ptr, addr_len) = (args[4], args[5]);
                tracing::debug!(sockfd, buf_ptr, buf_len, flags, addr_ptr, addr_len, "sendto");
                let buf = self.memory.read_bytes(buf_ptr, buf_len)?;
                let addr: GuestSockAddr = self.memory.read_pod(addr_ptr)?;
                let native = addr.to_native();
                let res = unsafe {
                    libc::sendto(
                        sockfd,
                        buf.as_ptr() as *const libc::c_void,
                        buf.len(),
                        flags,
                        &native,
                        mem::size_of::<libc::sockaddr>() as libc::socklen_t,
                    )
                };
                Ok(res as i32)
            }
            SocketCall::RecvFrom => {
                // args[5] is a pointer to the guest's socklen, not a length:
                // the kernel modifies sockaddr and socklen in place, so both
                // shadows must be written back afterwards.
                let (addr_ptr, addr_len_ptr) = (args[4], args[5]);
                tracing::debug!(
                    sockfd,
                    buf_ptr,
                    buf_len,
                    flags,
                    addr_ptr,
                    addr_len_ptr,
                    "recvfrom"
                );
                let mut buf = vec![0u8; buf_len as usize];
                let addr: GuestSockAddr = self.memory.read_pod(addr_ptr)?;
                let mut native = addr.to_native();
                let mut native_len = mem::size_of::<libc::sockaddr>() as libc::socklen_t;
                let res = unsafe {
                    libc::recvfrom(
                        sockfd,
                        buf.as_mut_ptr() as *mut libc::c_void,
                        buf.len(),
                        flags,
                        &mut native,
                        &mut native_len,
                    )
                };
                if res > 0 {
                    self.memory.write_bytes(buf_ptr, &buf[..res as usize])?;
                }
                self.memory
                    .write_pod(addr_ptr, &GuestSockAddr::from_native(&native))?;
                self.memory.write_i32(addr_len_ptr, native_len as i32)?;
                Ok(res as i32)
            }
            _ => unreachable!("sc_transfer only handles the four transfer ops"),
        }
    }

    fn sc_getsockname(&self, args_ptr: u32) -> Result<i32, Trap> {
        let args = self.memory.read_u32s(args_ptr, 3)?;
        let (sockfd, addr_ptr, addr_len_ptr) = (args[0] as i32, args[1], args[2]);
        tracing::debug!(sockfd, addr_ptr, addr_len_ptr, "getsockname");

        fdtable::check(sockfd)?;
        let addr: GuestSockAddr = self.memory.read_pod(addr_ptr)?;
        let mut native = addr.to_native();
        let mut native_len = mem::size_of::<libc::sockaddr>() as libc::socklen_t;
        let res = unsafe { libc::getsockname(sockfd, &mut native, &mut native_len) };

        self.memory
            .write_pod(addr_ptr, &GuestSockAddr::from_native(&native))?;
        self.memory.write_i32(addr_len_ptr, native_len as i32)?;
        Ok(res)
    }

    /// `_gethostbyname(hostnamePtr)`: resolution happens guest-side via the
    /// whitelisted resolver files; this intrinsic only logs.
    pub fn gethostbyname(&self, hostname_ptr: u32) -> Result<i32, Trap> {
        let hostname = self.memory.read_cstr(hostname_ptr)?;
        tracing::debug!(hostname = %hostname, "gethostbyname");
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::abi::{GuestPod, GuestSockAddr};
    use crate::error::Trap;
    use crate::fdtable;
    use crate::memory::MemoryView;
    use crate::mock::HeapMemory;
    use crate::whitelist::PathWhitelist;

    use super::super::SyscallEnv;
    use super::SocketCall;

    fn env() -> SyscallEnv {
        let memory = MemoryView::new(Arc::new(HeapMemory::new(2, 16)));
        SyscallEnv::new(memory, PathWhitelist::empty())
    }

    fn write_args(env: &SyscallEnv, at: u32, args: &[u32]) {
        for (i, a) in args.iter().enumerate() {
            env.memory().write_i32(at + i as u32 * 4, *a as i32).unwrap();
        }
    }

    #[test]
    fn socket_registers_fd_and_getsockname_reports_bound_port() {
        fdtable::clear();
        let env = env();

        write_args(
            &env,
            0,
            &[libc::AF_INET as u32, libc::SOCK_DGRAM as u32, 0],
        );
        let fd = env.socketcall(SocketCall::Socket as i32, 0).unwrap();
        assert!(fd >= 0);
        assert!(fdtable::contains(fd));

        // bind to 127.0.0.1:0
        let mut addr = GuestSockAddr {
            family: libc::AF_INET as u16,
            data: [0; 14],
        };
        addr.data[2..6].copy_from_slice(&[127, 0, 0, 1]);
        let mut encoded = [0u8; 16];
        addr.encode(&mut encoded);
        env.memory().write_bytes(256, &encoded).unwrap();

        write_args(&env, 0, &[fd as u32, 256, 16]);
        assert_eq!(env.socketcall(SocketCall::Bind as i32, 0).unwrap(), 0);

        // getsockname writes the kernel-assigned port back into the shadow
        write_args(&env, 0, &[fd as u32, 256, 512]);
        assert_eq!(env.socketcall(SocketCall::GetSockName as i32, 0).unwrap(), 0);
        let reported: GuestSockAddr = env.memory().read_pod(256).unwrap();
        assert_eq!(reported.family, libc::AF_INET as u16);
        let port = u16::from_be_bytes([reported.data[0], reported.data[1]]);
        assert_ne!(port, 0);
        assert_eq!(env.memory().read_i32(512).unwrap(), 16);

        env.close(fd).unwrap();
    }

    #[test]
    fn client_ops_require_fd_ownership() {
        fdtable::clear();
        let env = env();
        for op in [
            SocketCall::Connect,
            SocketCall::Bind,
            SocketCall::Send,
            SocketCall::Recv,
            SocketCall::SendTo,
            SocketCall::RecvFrom,
            SocketCall::GetSockName,
        ] {
            write_args(&env, 0, &[77, 256, 16, 0, 256, 512]);
            assert!(
                matches!(env.socketcall(op as i32, 0), Err(Trap::FdNotOwned(77))),
                "{op:?} must reject an unowned fd"
            );
        }
    }

    #[test]
    fn server_ops_trap() {
        fdtable::clear();
        let env = env();
        write_args(&env, 0, &[1, 1]);
        assert!(matches!(
            env.socketcall(SocketCall::Listen as i32, 0),
            Err(Trap::ServerSocketOp("listen"))
        ));
        assert!(matches!(
            env.socketcall(SocketCall::Accept as i32, 0),
            Err(Trap::ServerSocketOp("accept"))
        ));
    }

    #[test]
    fn stubbed_and_unknown_ops_return_zero() {
        fdtable::clear();
        let env = env();
        for op in [
            SocketCall::GetPeerName,
            SocketCall::SocketPair,
            SocketCall::Shutdown,
            SocketCall::SetSockOpt,
            SocketCall::GetSockOpt,
            SocketCall::SendMsg,
            SocketCall::RecvMsg,
            SocketCall::Accept4,
            SocketCall::RecvMmsg,
            SocketCall::SendMmsg,
        ] {
            assert_eq!(env.socketcall(op as i32, 0).unwrap(), 0);
        }
        assert_eq!(env.socketcall(99, 0).unwrap(), 0);
    }

    #[test]
    fn udp_sendto_recvfrom_loopback_round_trip() {
        fdtable::clear();
        let env = env();
        let mem = env.memory().clone();

        // Two UDP sockets on loopback; one sends to the other's bound port.
        let mk_socket = || {
            write_args(&env, 0, &[libc::AF_INET as u32, libc::SOCK_DGRAM as u32, 0]);
            env.socketcall(SocketCall::Socket as i32, 0).unwrap()
        };
        let rx = mk_socket();
        let tx = mk_socket();

        let mut addr = GuestSockAddr {
            family: libc::AF_INET as u16,
            data: [0; 14],
        };
        addr.data[2..6].copy_from_slice(&[127, 0, 0, 1]);
        let mut encoded = [0u8; 16];
        addr.encode(&mut encoded);
        mem.write_bytes(256, &encoded).unwrap();

        write_args(&env, 0, &[rx as u32, 256, 16]);
        assert_eq!(env.socketcall(SocketCall::Bind as i32, 0).unwrap(), 0);
        write_args(&env, 0, &[rx as u32, 256, 512]);
        assert_eq!(env.socketcall(SocketCall::GetSockName as i32, 0).unwrap(), 0);

        // Payload in guest memory; target sockaddr now carries the real port.
        mem.write_bytes(1024, b"ping").unwrap();
        write_args(&env, 0, &[tx as u32, 1024, 4, 0, 256, 16]);
        assert_eq!(env.socketcall(SocketCall::SendTo as i32, 0).unwrap(), 4);

        mem.write_bytes(300, &[0u8; 16]).unwrap();
        write_args(&env, 0, &[rx as u32, 2048, 16, 0, 300, 560]);
        let n = env.socketcall(SocketCall::RecvFrom as i32, 0).unwrap();
        assert_eq!(n, 4);
        assert_eq!(mem.read_bytes(2048, 4).unwrap(), b"ping");
        // The sender's address was written back to the guest shadow.
        let from: GuestSockAddr = mem.read_pod(300).unwrap();
        assert_eq!(from.family, libc::AF_INET as u16);

        env.close(rx).unwrap();
        env.close(tx).unwrap();
    }
}
