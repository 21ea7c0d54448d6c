//! The memory syscall surface.
//!
//! Return values follow the C convention the callers expect: `mmap`
//! returns the mapped base or 0, `munmap` returns 1 or -1 (as `usize`),
//! `freemem` and `swapstat` always succeed. Argument decoding and the
//! anonymous-mapping argument rules live here; everything past decoding is
//! [`crate::mem::vma`]'s problem.

use crate::fs::ProcessFileDescriptor;
use crate::mem::vma::{self, Backing, PopulateMode, Protection};
use crate::system::SystemState;
use crate::threading::process::Pid;
use nephros_shared::println;

pub const SYS_MMAP: usize = 0x10;
pub const SYS_MUNMAP: usize = 0x11;
pub const SYS_FREEMEM: usize = 0x12;
pub const SYS_SWAPSTAT: usize = 0x13;

pub const PROT_READ: usize = 0x1;
pub const PROT_WRITE: usize = 0x2;

pub const MAP_ANONYMOUS: usize = 0x1;
pub const MAP_POPULATE: usize = 0x2;

/// Processes a syscall made by a user program of `pid`. The return value
/// is the syscall's return value; its meaning depends on the syscall.
#[allow(clippy::too_many_arguments)]
pub fn handler(
    system: &SystemState,
    pid: Pid,
    syscall_number: usize,
    arg0: usize,
    arg1: usize,
    arg2: usize,
    arg3: usize,
    arg4: usize,
    arg5: usize,
) -> usize {
    match syscall_number {
        SYS_MMAP => sys_mmap(system, pid, arg0, arg1, arg2, arg3, arg4 as isize, arg5),
        SYS_MUNMAP => match vma::unmap(system, pid, arg0) {
            Ok(()) => 1,
            Err(_) => usize::MAX,
        },
        SYS_FREEMEM => system.frames.free_count(),
        SYS_SWAPSTAT => {
            let stats = system.swap.stats();
            ((stats.pages_read << 32) | (stats.pages_written & 0xffff_ffff)) as usize
        }
        _ => {
            println!("unknown syscall number {syscall_number:#x} from pid {pid}");
            usize::MAX
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn sys_mmap(
    system: &SystemState,
    pid: Pid,
    addr: usize,
    length: usize,
    prot: usize,
    flags: usize,
    fd: isize,
    offset: usize,
) -> usize {
    if prot & PROT_READ == 0 {
        return 0;
    }
    let prot = Protection {
        read: true,
        write: prot & PROT_WRITE != 0,
    };

    let backing = if flags & MAP_ANONYMOUS != 0 {
        // Anonymous mappings must not smuggle in file arguments.
        if fd != -1 || offset != 0 {
            return 0;
        }
        Backing::Anonymous
    } else {
        let Ok(fd) = i16::try_from(fd) else {
            return 0;
        };
        let Ok(file) = system.files.get(ProcessFileDescriptor { pid, fd }) else {
            return 0;
        };
        Backing::File { file, offset }
    };

    let populate = if flags & MAP_POPULATE != 0 {
        PopulateMode::Eager
    } else {
        PopulateMode::Lazy
    };

    match vma::map(system, pid, addr, length, prot, backing, populate) {
        Ok(base) => base,
        Err(_) => 0,
    }
}
