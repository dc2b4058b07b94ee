//! Raw process introspection. Everything here must stay allocation-free:
//! it runs while the world is stopped or from inside allocation paths.

pub fn gettid() -> libc::pid_t {
    unsafe { libc::syscall(libc::SYS_gettid) as libc::pid_t }
}

pub fn tgkill(pid: libc::pid_t, tid: libc::pid_t, sig: libc::c_int) -> libc::c_int {
    unsafe { libc::syscall(libc::SYS_tgkill, pid, tid, sig) as libc::c_int }
}

/// Walk `/proc/self/task` with raw getdents64, calling `cb` with every live
/// thread id. opendir/readdir would allocate.
pub fn iterate_tids(mut cb: impl FnMut(libc::pid_t)) {
    // struct linux_dirent64: u64 ino, i64 off, u16 reclen, u8 type, name[].
    const RECLEN_OFFSET: usize = 16;
    const NAME_OFFSET: usize = 19;

    let path = b"/proc/self/task\0";
    let fd = unsafe {
        libc::open(
            path.as_ptr() as *const libc::c_char,
            libc::O_RDONLY | libc::O_DIRECTORY,
        )
    };
    if fd < 0 {
        crate::fatal!("cannot open /proc/self/task");
    }
    let mut buf = [0u8; 1024];
    loop {
        let nread = unsafe {
            libc::syscall(
                libc::SYS_getdents64,
                fd,
                buf.as_mut_ptr(),
                buf.len() as libc::c_uint,
            )
        };
        if nread < 0 {
            crate::fatal!("getdents64 failed");
        }
        if nread == 0 {
            break;
        }
        let mut pos = 0usize;
        while pos < nread as usize {
            let reclen =
                u16::from_ne_bytes([buf[pos + RECLEN_OFFSET], buf[pos + RECLEN_OFFSET + 1]])
                    as usize;
            let name = &buf[pos + NAME_OFFSET..];
            if name[0] != b'.' {
                if let Some(tid) = parse_decimal(name) {
                    cb(tid as libc::pid_t);
                }
            }
            pos += reclen;
        }
    }
    unsafe {
        libc::close(fd);
    }
}

fn parse_decimal(bytes: &[u8]) -> Option<i64> {
    let mut value: i64 = 0;
    let mut seen = false;
    for &b in bytes {
        if b == 0 {
            break;
        }
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + (b - b'0') as i64;
        seen = true;
    }
    seen.then_some(value)
}

/// Resident set size in bytes, from `/proc/self/statm` (second field, pages).
pub fn rss_bytes() -> usize {
    let path = b"/proc/self/statm\0";
    let fd = unsafe { libc::open(path.as_ptr() as *const libc::c_char, libc::O_RDONLY) };
    if fd < 0 {
        return 0;
    }
    let mut buf = [0u8; 128];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    unsafe {
        libc::close(fd);
    }
    if n <= 0 {
        return 0;
    }
    let mut fields = buf[..n as usize].split(|&b| b == b' ');
    let _size = fields.next();
    match fields.next().and_then(parse_decimal) {
        Some(rss_pages) => (rss_pages as usize) << 12,
        None => 0,
    }
}

pub fn usec() -> usize {
    let mut tv = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    unsafe {
        libc::gettimeofday(&mut tv, std::ptr::null_mut());
    }
    tv.tv_sec as usize * 1_000_000 + tv.tv_usec as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_names() {
        assert_eq!(parse_decimal(b"1234\0junk"), Some(1234));
        assert_eq!(parse_decimal(b"0\0"), Some(0));
        assert_eq!(parse_decimal(b"x1\0"), None);
        assert_eq!(parse_decimal(b"\0"), None);
    }

    #[test]
    fn sees_own_thread() {
        let me = gettid();
        let mut found = false;
        iterate_tids(|tid| {
            if tid == me {
                found = true;
            }
        });
        assert!(found);
    }

    #[test]
    fn rss_is_nonzero() {
        assert!(rss_bytes() > 0);
    }
}
