use thiserror::Error;

/// The V6 error numbers, reflected to user space in R0 with PS.C set.
///
/// `ENOSYS` (100) and up are not real V6 errnos; a syscall that fails
/// with one of them delivers SIGSYS instead of returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Errno {
    #[error("EPERM")]
    EPERM = 1,
    #[error("ENOENT")]
    ENOENT = 2,
    #[error("ESRCH")]
    ESRCH = 3,
    #[error("EINTR")]
    EINTR = 4,
    #[error("EIO")]
    EIO = 5,
    #[error("ENXIO")]
    ENXIO = 6,
    #[error("E2BIG")]
    E2BIG = 7,
    #[error("ENOEXEC")]
    ENOEXEC = 8,
    #[error("EBADF")]
    EBADF = 9,
    #[error("ECHILD")]
    ECHILD = 10,
    #[error("EAGAIN")]
    EAGAIN = 11,
    #[error("ENOMEM")]
    ENOMEM = 12,
    #[error("EACCES")]
    EACCES = 13,
    #[error("ENOTBLK")]
    ENOTBLK = 14,
    #[error("EBUSY")]
    EBUSY = 15,
    #[error("EEXIST")]
    EEXIST = 16,
    #[error("EXDEV")]
    EXDEV = 17,
    #[error("ENODEV")]
    ENODEV = 18,
    #[error("ENOTDIR")]
    ENOTDIR = 19,
    #[error("EISDIR")]
    EISDIR = 20,
    #[error("EINVAL")]
    EINVAL = 21,
    #[error("ENFILE")]
    ENFILE = 22,
    #[error("EMFILE")]
    EMFILE = 23,
    #[error("ENOTTY")]
    ENOTTY = 24,
    #[error("ETXTBSY")]
    ETXTBSY = 25,
    #[error("EFBIG")]
    EFBIG = 26,
    #[error("ENOSPC")]
    ENOSPC = 27,
    #[error("ESPIPE")]
    ESPIPE = 28,
    #[error("EROFS")]
    EROFS = 29,
    #[error("EMLINK")]
    EMLINK = 30,
    #[error("EPIPE")]
    EPIPE = 31,
    #[error("ENOSYS")]
    ENOSYS = 100,
    #[error("EFAULT")]
    EFAULT = 106,
}

impl Errno {
    /// True for the pseudo-errnos that kill the process with SIGSYS
    /// rather than returning to user space.
    pub fn is_fatal(self) -> bool {
        self as u16 >= 100
    }
}
