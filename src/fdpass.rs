//! Transfers an open file descriptor from an emulator process (driven
//! remotely) to the controller, over a Unix datagram socket using
//! `SCM_RIGHTS`. Grounded in reptyr's `setup_steal_socket` /
//! `setup_steal_socket_child` / `steal_child_pty`.

use crate::debugger::Debugger;
use crate::error::{Error, SysError};
use crate::ptrace_x86_64::X86_64Debugger;
use rustix::io::Errno;
use std::fs;
use std::io::Error as IoError;
use std::mem::size_of;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

fn last_errno() -> Errno {
    Errno::from_io_error(&IoError::last_os_error()).unwrap()
}

/// A freshly created, privately-owned directory holding the one-shot
/// socket used for a single steal transfer. Removed on drop.
pub struct StealSocket {
    dir: PathBuf,
    sock_path: PathBuf,
    pub socket: UnixDatagram,
}

impl StealSocket {
    /// Create `/tmp/<prefix>.XXXXXX/<prefix>.sock`, matching reptyr's
    /// naming convention (generalized to this crate's own name).
    pub fn create(prefix: &str) -> Result<Self, Error> {
        let mut template = format!("/tmp/{prefix}.XXXXXX\0").into_bytes();

        let ptr = unsafe { libc::mkdtemp(template.as_mut_ptr() as *mut libc::c_char) };
        if ptr.is_null() {
            return Err(SysError("mkdtemp()", last_errno()).into());
        }
        template.pop(); // drop the NUL terminator for the Rust string
        let dir = PathBuf::from(String::from_utf8(template).map_err(|_| Error::Malformed)?);

        fs::set_permissions(&dir, std::os::unix::fs::PermissionsExt::from_mode(0o755))?;

        let sock_path = dir.join(format!("{prefix}.sock"));
        let socket = UnixDatagram::bind(&sock_path)?;
        fs::set_permissions(&sock_path, std::os::unix::fs::PermissionsExt::from_mode(0o666))?;

        Ok(StealSocket { dir, sock_path, socket })
    }

    pub fn path(&self) -> &Path {
        &self.sock_path
    }
}

impl Drop for StealSocket {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.sock_path);
        let _ = fs::remove_dir(&self.dir);
    }
}

/// Open a `SOCK_DGRAM` Unix socket inside `emulator` and connect it to
/// `sock_path`. Returns the fd as seen from inside the emulator.
pub fn connect_emulator(
    emulator: &mut X86_64Debugger,
    scratch_addr: u64,
    sock_path: &Path,
) -> Result<i32, Error> {
    let socket_num = emulator.syscalls().socket.ok_or(Error::Remote(libc::ENOSYS))?;
    let fd = emulator.remote_syscall(
        socket_num,
        [libc::AF_UNIX as u64, libc::SOCK_DGRAM as u64, 0, 0, 0, 0],
    )?;
    if fd < 0 {
        return Err(Error::Remote(-fd as i32));
    }
    let emulator_fd = fd as i32;

    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    let path_bytes = sock_path.as_os_str().as_bytes();
    if path_bytes.len() >= addr.sun_path.len() {
        return Err(Error::Malformed);
    }
    for (i, b) in path_bytes.iter().enumerate() {
        addr.sun_path[i] = *b as libc::c_char;
    }

    let addr_bytes = unsafe {
        std::slice::from_raw_parts(&addr as *const _ as *const u8, size_of::<libc::sockaddr_un>())
    };
    emulator.write_mem(scratch_addr, addr_bytes)?;

    let connect_num = emulator.syscalls().connect.ok_or(Error::Remote(libc::ENOSYS))?;
    let ret = emulator.remote_syscall(
        connect_num,
        [
            emulator_fd as u64,
            scratch_addr,
            size_of::<libc::sockaddr_un>() as u64,
            0,
            0,
            0,
        ],
    )?;
    if ret < 0 {
        return Err(Error::Remote(-ret as i32));
    }

    Ok(emulator_fd)
}

/// Instruct `emulator` to send `master_fd` over `emulator_sock_fd` as an
/// `SCM_RIGHTS` control message. The marshalled `msghdr`'s `msg_control`
/// pointer is relocated from a local address to its equivalent inside
/// the scratch page before the blob is copied into the emulator - the
/// pointer is meaningless in the emulator's address space otherwise.
pub fn send_fd(
    emulator: &mut X86_64Debugger,
    scratch_addr: u64,
    emulator_sock_fd: i32,
    master_fd: i32,
) -> Result<(), Error> {
    let cmsg_len = unsafe { libc::CMSG_LEN(size_of::<i32>() as u32) } as usize;
    let cmsg_space = unsafe { libc::CMSG_SPACE(size_of::<i32>() as u32) } as usize;

    let mut cmsg_buf = vec![0u8; cmsg_space];
    unsafe {
        let cmsg_ptr = cmsg_buf.as_mut_ptr() as *mut libc::cmsghdr;
        (*cmsg_ptr).cmsg_len = cmsg_len as _;
        (*cmsg_ptr).cmsg_level = libc::SOL_SOCKET;
        (*cmsg_ptr).cmsg_type = libc::SCM_RIGHTS;
        let data_ptr = libc::CMSG_DATA(cmsg_ptr);
        std::ptr::copy_nonoverlapping(
            &master_fd as *const i32 as *const u8,
            data_ptr,
            size_of::<i32>(),
        );
    }

    let msghdr_size = size_of::<libc::msghdr>();
    // Relocated: valid only once this blob has been copied to scratch_addr
    // inside the emulator's address space.
    let control_addr = scratch_addr + msghdr_size as u64;

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_control = control_addr as *mut libc::c_void;
    msg.msg_controllen = cmsg_len as _;

    let msg_bytes =
        unsafe { std::slice::from_raw_parts(&msg as *const _ as *const u8, msghdr_size) };

    let mut blob = Vec::with_capacity(msghdr_size + cmsg_space);
    blob.extend_from_slice(msg_bytes);
    blob.extend_from_slice(&cmsg_buf);

    emulator.write_mem(scratch_addr, &blob)?;

    let sendmsg_num = emulator.syscalls().sendmsg.ok_or(Error::Remote(libc::ENOSYS))?;
    let ret = emulator.remote_syscall(
        sendmsg_num,
        [
            emulator_sock_fd as u64,
            scratch_addr,
            libc::MSG_DONTWAIT as u64,
            0,
            0,
            0,
        ],
    )?;
    if ret < 0 {
        return Err(Error::Remote(-ret as i32));
    }

    Ok(())
}

/// Receive the fd sent by `send_fd` on our own (non-remote) listening
/// socket.
pub fn recv_fd(socket: &UnixDatagram) -> Result<OwnedFd, Error> {
    use std::os::fd::AsRawFd;

    let cmsg_space = unsafe { libc::CMSG_SPACE(size_of::<i32>() as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_space as _;

    let ret = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, libc::MSG_DONTWAIT) };
    if ret < 0 {
        return Err(SysError("recvmsg()", last_errno()).into());
    }

    let min_len = unsafe { libc::CMSG_LEN(size_of::<i32>() as u32) } as usize;
    if (msg.msg_controllen as usize) < min_len {
        return Err(Error::Malformed);
    }

    let cmsg_ptr = unsafe { libc::CMSG_FIRSTHDR(&msg) };
    if cmsg_ptr.is_null() {
        return Err(Error::Malformed);
    }

    let mut fd_bytes = [0u8; 4];
    unsafe {
        std::ptr::copy_nonoverlapping(libc::CMSG_DATA(cmsg_ptr), fd_bytes.as_mut_ptr(), 4);
    }
    let received_fd = i32::from_ne_bytes(fd_bytes);

    Ok(unsafe { OwnedFd::from_raw_fd(received_fd) })
}
