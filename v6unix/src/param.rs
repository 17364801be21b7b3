//! Tunable constants and fundamental limits, from the V6 param.h and
//! proc.h.

pub const NOFILE: usize = 15; // max open files per process
pub const CANBSIZ: usize = 256; // max size of typewriter line
pub const NPROC: usize = 50; // max number of processes
pub const HZ: u16 = 60; // ticks/second of the clock

pub const ROOTINO: u16 = 1; // i number of all roots
pub const DIRSIZ: usize = 14; // max characters per directory entry

pub const NTTY: usize = 8; // /dev/tty1 .. /dev/tty8

// signals
pub const NSIG: usize = 20;
pub const SIGHUP: u8 = 1; // hangup
pub const SIGINT: u8 = 2; // interrupt (rubout)
pub const SIGQIT: u8 = 3; // quit (FS)
pub const SIGINS: u8 = 4; // illegal instruction
pub const SIGTRC: u8 = 5; // trace or breakpoint
pub const SIGIOT: u8 = 6; // iot
pub const SIGEMT: u8 = 7; // emt
pub const SIGFPT: u8 = 8; // floating exception
pub const SIGKIL: u8 = 9; // kill
pub const SIGBUS: u8 = 10; // bus error
pub const SIGSEG: u8 = 11; // segmentation violation
pub const SIGSYS: u8 = 12; // bad system call
pub const SIGPIPE: u8 = 13; // end of pipe

// priorities; negative is high. The value passed to sleep decides only
// whether a signal can interrupt the sleep (pri >= 0).
pub const PSWP: i8 = -100;
pub const PINOD: i8 = -90;
pub const PRIBIO: i8 = -50;
pub const PPIPE: i8 = 1;
pub const PWAIT: i8 = 40;
pub const PSLEP: i8 = 90;
pub const PUSER: i8 = 100;

// process flag codes
pub const SLOAD: u8 = 0o1; // in core
pub const SSYS: u8 = 0o2; // scheduling process
pub const SLOCK: u8 = 0o4; // process cannot be swapped
pub const SSWAP: u8 = 0o10; // process is being swapped out
pub const STRC: u8 = 0o20; // process is being traced
pub const SWTED: u8 = 0o40; // another tracing flag

// Latest time stamps on the distribution disks are on /dev, at
// 177300290. Boot to that time, since date cannot display years like
// 2023.
pub const BOOTTIME: i64 = 177300290;
