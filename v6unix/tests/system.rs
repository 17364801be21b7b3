use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use v6unix::{PStat, System};

// A minimal disk with the device nodes the programs below need.
const ARCHIVE: &str = "\
-- /dev mode=040555 uid=0 gid=0 atime=0 mtime=0 --
-- /dev/null mode=020666 uid=0 gid=0 major=1 minor=1 atime=0 mtime=0 --
-- /dev/mem mode=020640 uid=0 gid=0 major=2 minor=1 atime=0 mtime=0 --
-- /dev/kmem mode=020640 uid=0 gid=0 major=2 minor=2 atime=0 mtime=0 --
-- /dev/tty8 mode=020620 uid=0 gid=0 major=4 minor=8 atime=0 mtime=0 --
";

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    fn take(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow_mut().split_off(0)).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Wraps raw program bytes in a 0o407 a.out header.
fn aout(body: &[u8]) -> Vec<u8> {
    assert_eq!(body.len() % 2, 0);
    let mut b = Vec::new();
    for w in [0o407u16, body.len() as u16, 0, 0, 0, 0, 0, 1] {
        b.extend_from_slice(&w.to_le_bytes());
    }
    b.extend_from_slice(body);
    b
}

fn words(b: &mut Vec<u8>, ws: &[u16]) {
    b.extend_from_slice(bytemuck::cast_slice(ws));
}

fn pad_to(b: &mut Vec<u8>, len: usize) {
    assert!(b.len() <= len, "layout overflow: {} > {len}", b.len());
    b.resize(len, 0);
}

fn boot(program: Vec<u8>, argv: &[&str]) -> (System, SharedBuf) {
    let mut sys = System::new(ARCHIVE.as_bytes()).unwrap();
    let out = SharedBuf::default();
    sys.start(&aout(&program), argv, out.clone()).unwrap();
    (sys, out)
}

// open /dev/tty8; write "hello, world\n"; exit.
fn hello_program() -> Vec<u8> {
    let mut b = Vec::new();
    words(
        &mut b,
        &[
            0o104405, 0o30, 2, //     sys open; path; 2
            0o104404, 0o44, 13, //    sys write; msg; 13.
            0o104401, //              sys exit
        ],
    );
    pad_to(&mut b, 0o30);
    b.extend_from_slice(b"/dev/tty8\0");
    pad_to(&mut b, 0o44);
    b.extend_from_slice(b"hello, world\n");
    pad_to(&mut b, 0o62);
    b
}

#[test]
fn hello_world_on_tty8() {
    let (mut sys, out) = boot(hello_program(), &["hello"]);
    sys.wait();
    assert_eq!(out.take(), "hello, world\n");
    assert_eq!(sys.procs[0].status, PStat::Zomb);
    assert_eq!(sys.procs[0].args[0] & 0xff, 0); // no signal in the status
}

// pipe; fork; the child writes its first 8192 bytes of memory into the
// pipe in two 4096-byte chunks, the parent reads them back.
fn pipe_program() -> Vec<u8> {
    let mut b = Vec::new();
    words(
        &mut b,
        &[
            0o104452, //           sys pipe (r0=rfd=0, r1=wfd=1)
            0o104402, //           sys fork
            0o000412, //           br child
            0o005000, //           clr r0
            0o104403, 0o040000, 0o010000, // sys read; 040000; 4096.
            0o005000, //           clr r0
            0o104403, 0o050000, 0o010000, // sys read; 050000; 4096.
            0o104407, //           sys wait
            0o104401, //           sys exit
            0o012700, 1, //        child: mov #1, r0
            0o104404, 0o000000, 0o010000, // sys write; 0; 4096.
            0o104404, 0o010000, 0o010000, // sys write; 010000; 4096.
            0o104401, //           sys exit
        ],
    );
    b
}

#[test]
fn pipe_carries_8k_across_fork() {
    let (mut sys, _out) = boot(pipe_program(), &["pipetest"]);
    sys.wait();

    // the child has been reaped; only the parent zombie remains
    assert_eq!(sys.procs.len(), 1);
    let p = &sys.procs[0];
    assert_eq!(p.status, PStat::Zomb);
    let mem = &p.cpu.mem;
    assert_eq!(&mem[0o40000..0o50000], &mem[0..0o10000]);
    assert_eq!(&mem[0o50000..0o60000], &mem[0o10000..0o20000]);
    // spot-check that real program bytes travelled
    assert_eq!(mem[0o40000], 0o104452u16.to_le_bytes()[0]);
}

// cat: open the tty twice, set erase to DEL via stty, then copy input
// lines to output until EOF.
fn cat_program() -> Vec<u8> {
    let mut b = Vec::new();
    words(
        &mut b,
        &[
            0o104405, 0o64, 2, //     sys open; path; 2   (fd 0)
            0o104405, 0o64, 2, //     sys open; path; 2   (fd 1)
            0o005000, //              clr r0
            0o104437, 0o100, //       sys stty; ttws
            0o005000, //              loop: clr r0
            0o104403, 0o200, 0o400, //   sys read; buf; 256.
            0o005700, //              tst r0
            0o001410, //              beq exit
            0o010067, 0o10, //        mov r0, wcount
            0o012700, 1, //           mov #1, r0
            0o104404, 0o200, 0, //    sys write; buf; wcount: 0
            0o000762, //              br loop
            0o104401, //              exit: sys exit
        ],
    );
    pad_to(&mut b, 0o64);
    b.extend_from_slice(b"/dev/tty8\0");
    pad_to(&mut b, 0o100);
    words(&mut b, &[0, 0o040177, 0o36]); // speeds; DEL erase, @ kill; flags
    b
}

#[test]
fn tty_cooked_input_and_interrupt() {
    let (mut sys, out) = boot(cat_program(), &["cat"]);
    sys.wait();

    // cat is parked in the tty read
    assert_eq!(sys.tty_read, 1 << 8);
    assert_eq!(sys.procs[0].status, PStat::Wait);

    for &c in b"hi\n" {
        sys.tty_input(8, c);
    }
    sys.wait();
    // once echoed by the tty, once written by cat
    assert_eq!(out.take(), "hi\nhi\n");
    assert_eq!(sys.tty_read, 1 << 8);

    // erase was set to DEL, so the host DEL maps to the interrupt
    // character and kills cat
    sys.tty_input(8, 0x7f);
    sys.wait();
    let p = &sys.procs[0];
    assert_eq!(p.status, PStat::Zomb);
    assert_eq!(p.args[0] & 0xff, 2); // SIGINT in the wait status
}

#[test]
fn tty_erase_edits_the_line() {
    let (mut sys, out) = boot(cat_program(), &["cat"]);
    sys.wait();
    for &c in b"datx#e\n" {
        sys.tty_input(8, c);
    }
    sys.wait();
    let echoed = out.take();
    // the echo shows the raw keystrokes; cat sees the edited line
    assert!(echoed.starts_with("datx#e\n"));
    assert_eq!(&echoed[7..], "date\n");
}

// sig: install a SIGINT handler; fork; the child kills the parent out
// of its wait. The handler exits with status 7.
fn sig_program() -> Vec<u8> {
    let mut b = Vec::new();
    words(
        &mut b,
        &[
            0o104460, 2, 0o40, // sys sig; SIGINT; handler
            0o104402, //          sys fork
            0o000403, //          br child
            0o104407, //          sys wait (parent)
            0o000777, //          br .
            0, //                 pad
            0o104445, 2, //       child: sys kill; SIGINT  (r0 = parent pid)
            0o104401, //          sys exit
        ],
    );
    pad_to(&mut b, 0o40);
    words(
        &mut b,
        &[
            0o012700, 7, // handler: mov #7, r0
            0o104401, //   sys exit
        ],
    );
    b
}

#[test]
fn signal_interrupts_wait_and_runs_handler() {
    let (mut sys, _out) = boot(sig_program(), &["sigtest"]);
    sys.wait();

    let parent = sys.procs.iter().find(|p| p.pid == 1).unwrap();
    assert_eq!(parent.status, PStat::Zomb);
    // the handler ran: exit status 7 in the high byte
    assert_eq!(parent.args[0], 7 << 8);

    let child = sys.procs.iter().find(|p| p.pid == 2).unwrap();
    assert_eq!(child.status, PStat::Zomb);
    assert_eq!(child.args[0] & 0xff, 0);
}

// fork; the child scribbles on memory the parent also reads,
// demonstrating the copies are independent.
fn fork_memory_program() -> Vec<u8> {
    let mut b = Vec::new();
    words(
        &mut b,
        &[
            0o012737, 0o123, 0o2000, // mov #123, @#2000
            0o104402, //               sys fork
            0o000402, //               br child
            0o104407, //               sys wait (parent)
            0o104401, //               sys exit
            0o012737, 0o456, 0o2000, // child: mov #456, @#2000
            0o104401, //               sys exit
        ],
    );
    b
}

#[test]
fn fork_copies_memory() {
    let (mut sys, _out) = boot(fork_memory_program(), &["forktest"]);
    sys.wait();
    let parent = &sys.procs[0];
    assert_eq!(parent.status, PStat::Zomb);
    // the child's store to 0o2000 did not reach the parent
    assert_eq!(parent.cpu.mem.word(0o2000), 0o123);
}

#[test]
fn stdout_propagates_write_errors() {
    struct Failing;
    impl Write for Failing {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
    let mut sys = System::new(ARCHIVE.as_bytes()).unwrap();
    sys.start(&aout(&hello_program()), &["hello"], Failing)
        .unwrap();
    sys.wait();
    // the write failed with EIO but the program still exited
    assert_eq!(sys.procs[0].status, PStat::Zomb);
}
