use std::io::{Error, Result};
use std::os::raw::c_int;
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn memfd_open() -> Result<c_int> {
    use std::os::raw::c_char;
    const NAME: &[u8] = b"beamdump-vrb\0";
    let fd = unsafe {
        libc::syscall(
            libc::SYS_memfd_create,
            NAME.as_ptr() as *const c_char,
            libc::MFD_CLOEXEC,
        )
    };
    if fd < 0 {
        Err(Error::last_os_error())
    } else {
        Ok(fd as c_int)
    }
}

// Other POSIX systems (e.g. the BSDs) lack memfd_create; fall back to a
// named shm object that is unlinked immediately after opening, so the
// name never has to be globally unique for long and no third-party RNG
// dependency is needed to avoid collisions.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn memfd_open() -> Result<c_int> {
    const OFLAGS: c_int = libc::O_RDWR | libc::O_CREAT | libc::O_EXCL | libc::O_CLOEXEC;
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let pid = std::process::id();
    loop {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("/beamdump-vrb-{pid}-{n}\0");
        let fd = unsafe { libc::shm_open(name.as_ptr() as *const _, OFLAGS, 0o600) };
        if fd < 0 {
            let err = Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(err);
            }
        } else {
            unsafe { libc::shm_unlink(name.as_ptr() as *const _) };
            return Ok(fd);
        }
    }
}
