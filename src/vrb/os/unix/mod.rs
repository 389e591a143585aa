use libc::{sysconf, _SC_PAGESIZE};

mod posix;
pub use self::posix::{map_ring, unmap_ring};

pub fn page_size() -> usize {
    unsafe { sysconf(_SC_PAGESIZE) as usize }
}
