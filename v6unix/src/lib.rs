//! An in-memory re-creation of Research UNIX Sixth Edition: enough of
//! the kernel to boot `/etc/init`, run the shell, and execute unmodified
//! V6 user binaries on the [`pdp11`] interpreter.
//!
//! The host embeds a [`System`], feeds terminal bytes in with
//! [`System::tty_input`], and pumps the cooperative scheduler with
//! [`System::wait`].

pub mod aout;
pub mod dev;
pub mod disk;
pub mod errno;
pub mod file;
pub mod fs;
pub mod param;
pub mod pipe;
pub mod proc;
pub mod tty;

mod sched;
mod syscall;
mod sysfile;
mod sysproc;

pub use disk::DiskError;
pub use errno::Errno;
pub use proc::{PStat, Proc, StartError, System};
pub use tty::{PrintFn, Tty};
