//! Socket plumbing for the session threads.
//!
//! The std listener API exposes neither `SO_REUSEADDR` before bind nor
//! `shutdown` on a listening socket, and the data path wants its send
//! buffer sized explicitly, so this module drops to `libc` for the
//! socket-level calls and wraps the results back into std types.

use crate::error::Result;
use std::io;
use std::mem;
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd};

/// Bind a passive IPv4 socket on the wildcard address with an ephemeral
/// port, `SO_REUSEADDR` set and a backlog of 1. Returns the listener and
/// the port the kernel assigned.
pub(crate) fn bind_listener() -> Result<(TcpListener, u16)> {
    // SAFETY: plain socket syscalls on a freshly created fd; the fd is
    // either handed to TcpListener (which owns closing it) or closed on
    // the error paths.
    let listener = unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let one: libc::c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) != 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        let mut addr: libc::sockaddr_in = mem::zeroed();
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_addr.s_addr = libc::INADDR_ANY.to_be();
        addr.sin_port = 0;
        if libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ) != 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        if libc::listen(fd, 1) != 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        TcpListener::from_raw_fd(fd)
    };

    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

/// Shut a listening socket down so a thread parked in `accept` unblocks.
/// std has no listener equivalent of `TcpStream::shutdown`.
pub(crate) fn shutdown_listener(listener: &TcpListener) -> io::Result<()> {
    // SAFETY: shutdown on an fd we hold an open handle to.
    let rc = unsafe { libc::shutdown(listener.as_raw_fd(), libc::SHUT_RDWR) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Request `bytes` of kernel send buffer on the stream and return what
/// the kernel actually granted.
pub(crate) fn set_send_buffer(stream: &TcpStream, bytes: usize) -> Result<usize> {
    let fd = stream.as_raw_fd();
    let requested: libc::c_int = bytes as libc::c_int;
    // SAFETY: get/setsockopt with correctly sized out-params on a live fd.
    unsafe {
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            &requested as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) != 0
        {
            return Err(io::Error::last_os_error().into());
        }

        let mut granted: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        if libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            &mut granted as *mut _ as *mut libc::c_void,
            &mut len,
        ) != 0
        {
            return Err(io::Error::last_os_error().into());
        }
        Ok(granted as usize)
    }
}
