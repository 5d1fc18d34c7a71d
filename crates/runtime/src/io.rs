//! Ports
//!
//! The core needs only a narrow interface from an I/O backend: closed?,
//! ready?, wready?, getb, putb, seek, tell, close — rune-at-a-time, with
//! UTF-8 confined to the process-fd boundary. Backends that expose a file
//! descriptor let the reading primitives suspend the thread through the
//! foreign-function protocol instead of blocking the scheduler.
//!
//! A port cell owns its backend as a boxed trait object; the registered
//! sweeper releases it when the port is collected.

use std::io::{Read, Write};

use arcueid_core::string::{mkstring, mkstring_runes};
use arcueid_core::types::{register_typefn, TypeFn};
use arcueid_core::value::{has_tag, CellHdr, Tag, Value};
use arcueid_core::Interp;

pub trait PortBackend {
    fn closed(&self) -> bool;
    /// A rune can be read without blocking.
    fn ready(&mut self) -> bool;
    /// A rune can be written without blocking.
    fn wready(&mut self) -> bool;
    /// Read one rune; None at end of input.
    fn getb(&mut self) -> Option<char>;
    /// Write one rune; false when the port is closed or unwritable.
    fn putb(&mut self, ch: char) -> bool;
    fn seek(&mut self, pos: i64) -> Option<i64>;
    fn tell(&self) -> i64;
    fn close(&mut self);
    /// Pollable descriptor, when the backend has one.
    fn fd(&self) -> Option<i32> {
        None
    }
    /// Accumulated output, for string ports.
    fn contents(&self) -> Option<String> {
        None
    }
}

#[repr(C)]
pub struct PortCell {
    pub hdr: CellHdr,
    pub name: Value,
    backend: *mut dyn PortBackend,
}

pub fn is_port(v: Value) -> bool {
    has_tag(v, Tag::InPort) || has_tag(v, Tag::OutPort)
}

pub fn mkport(c: &mut Interp, tag: Tag, name: &str, backend: Box<dyn PortBackend>) -> Value {
    debug_assert!(matches!(tag, Tag::InPort | Tag::OutPort));
    let namev = mkstring(c, name);
    let v = c.alloc_cell(tag, std::mem::size_of::<PortCell>());
    if let Value::Obj(r) = v {
        unsafe {
            let cell = r.cell::<PortCell>();
            cell.name = namev;
            cell.backend = Box::into_raw(backend);
        }
    }
    v
}

pub fn backend_mut<'a>(port: Value) -> &'a mut dyn PortBackend {
    debug_assert!(is_port(port));
    unsafe { &mut *port.obj().cell::<PortCell>().backend }
}

fn port_marker(c: &mut Interp, v: Value, depth: u32) {
    let name = unsafe { v.obj().cell::<PortCell>().name };
    arcueid_core::gc::mark_value(c, name, depth);
}

fn port_sweeper(_c: &mut Interp, v: Value) {
    unsafe {
        let cell = v.obj().cell::<PortCell>();
        let mut b = Box::from_raw(cell.backend);
        b.close();
    }
}

/// Register port type functions and bind the standard handles.
pub fn init(c: &mut Interp) {
    let tf = TypeFn {
        marker: Some(port_marker),
        sweeper: Some(port_sweeper),
        ..TypeFn::default()
    };
    register_typefn(c, Tag::InPort, tf);
    register_typefn(c, Tag::OutPort, tf);

    let stdin = mkport(c, Tag::InPort, "stdin", Box::new(StdinPort::new()));
    let stdout = mkport(c, Tag::OutPort, "stdout", Box::new(StdoutPort { err: false, open: true }));
    let stderr = mkport(c, Tag::OutPort, "stderr", Box::new(StdoutPort { err: true, open: true }));
    for (name, port) in [("stdin", stdin), ("stdout", stdout), ("stderr", stderr)] {
        let sym = arcueid_core::symbol::intern(c, name);
        let genv = c.genv;
        arcueid_core::table::insert(c, genv, sym, port);
    }
}

/// Output string port; `inside` recovers the accumulated text.
pub fn outstring(c: &mut Interp, name: &str) -> Value {
    mkport(c, Tag::OutPort, name, Box::new(StringWriter { buf: Vec::new(), open: true }))
}

/// Input string port over a copy of `text`.
pub fn instring(c: &mut Interp, text: &str, name: &str) -> Value {
    let chars = text.chars().collect();
    mkport(c, Tag::InPort, name, Box::new(StringReader { chars, pos: 0, open: true }))
}

/// The text accumulated in an output string port.
pub fn inside(c: &mut Interp, port: Value) -> Option<Value> {
    let text = backend_mut(port).contents()?;
    let runes: Vec<char> = text.chars().collect();
    Some(mkstring_runes(c, &runes))
}

// =============================================================================
// Backends
// =============================================================================

struct StringWriter {
    buf: Vec<char>,
    open: bool,
}

impl PortBackend for StringWriter {
    fn closed(&self) -> bool {
        !self.open
    }
    fn ready(&mut self) -> bool {
        false
    }
    fn wready(&mut self) -> bool {
        self.open
    }
    fn getb(&mut self) -> Option<char> {
        None
    }
    fn putb(&mut self, ch: char) -> bool {
        if !self.open {
            return false;
        }
        self.buf.push(ch);
        true
    }
    fn seek(&mut self, pos: i64) -> Option<i64> {
        let p = pos.clamp(0, self.buf.len() as i64);
        self.buf.truncate(p as usize);
        Some(p)
    }
    fn tell(&self) -> i64 {
        self.buf.len() as i64
    }
    fn close(&mut self) {
        self.open = false;
    }
    fn contents(&self) -> Option<String> {
        Some(self.buf.iter().collect())
    }
}

struct StringReader {
    chars: Vec<char>,
    pos: usize,
    open: bool,
}

impl PortBackend for StringReader {
    fn closed(&self) -> bool {
        !self.open
    }
    fn ready(&mut self) -> bool {
        self.open && self.pos < self.chars.len()
    }
    fn wready(&mut self) -> bool {
        false
    }
    fn getb(&mut self) -> Option<char> {
        if !self.open || self.pos >= self.chars.len() {
            return None;
        }
        let ch = self.chars[self.pos];
        self.pos += 1;
        Some(ch)
    }
    fn putb(&mut self, _ch: char) -> bool {
        false
    }
    fn seek(&mut self, pos: i64) -> Option<i64> {
        let p = pos.clamp(0, self.chars.len() as i64);
        self.pos = p as usize;
        Some(p)
    }
    fn tell(&self) -> i64 {
        self.pos as i64
    }
    fn close(&mut self) {
        self.open = false;
    }
}

/// Process standard output or error; runes leave as UTF-8.
struct StdoutPort {
    err: bool,
    open: bool,
}

impl PortBackend for StdoutPort {
    fn closed(&self) -> bool {
        !self.open
    }
    fn ready(&mut self) -> bool {
        false
    }
    fn wready(&mut self) -> bool {
        self.open
    }
    fn getb(&mut self) -> Option<char> {
        None
    }
    fn putb(&mut self, ch: char) -> bool {
        if !self.open {
            return false;
        }
        let mut buf = [0u8; 4];
        let bytes = ch.encode_utf8(&mut buf).as_bytes();
        let ok = if self.err {
            std::io::stderr().write_all(bytes).is_ok()
        } else {
            std::io::stdout().write_all(bytes).is_ok()
        };
        if ok && ch == '\n' {
            let _ = if self.err {
                std::io::stderr().flush()
            } else {
                std::io::stdout().flush()
            };
        }
        ok
    }
    fn seek(&mut self, _pos: i64) -> Option<i64> {
        None
    }
    fn tell(&self) -> i64 {
        -1
    }
    fn close(&mut self) {
        let _ = std::io::stdout().flush();
        self.open = false;
    }
    fn fd(&self) -> Option<i32> {
        Some(if self.err { 2 } else { 1 })
    }
}

/// Process standard input with incremental UTF-8 assembly.
struct StdinPort {
    open: bool,
}

impl StdinPort {
    fn new() -> StdinPort {
        StdinPort { open: true }
    }
}

impl PortBackend for StdinPort {
    fn closed(&self) -> bool {
        !self.open
    }
    fn ready(&mut self) -> bool {
        if !self.open {
            return false;
        }
        let mut pfd = libc::pollfd { fd: 0, events: libc::POLLIN, revents: 0 };
        unsafe { libc::poll(&mut pfd, 1, 0) > 0 }
    }
    fn wready(&mut self) -> bool {
        false
    }
    fn getb(&mut self) -> Option<char> {
        if !self.open {
            return None;
        }
        let mut first = [0u8; 1];
        if std::io::stdin().read_exact(&mut first).is_err() {
            return None;
        }
        let need = match first[0] {
            b if b < 0x80 => 0,
            b if b & 0xE0 == 0xC0 => 1,
            b if b & 0xF0 == 0xE0 => 2,
            _ => 3,
        };
        let mut buf = [first[0], 0, 0, 0];
        if need > 0 && std::io::stdin().read_exact(&mut buf[1..=need]).is_err() {
            return None;
        }
        std::str::from_utf8(&buf[..=need]).ok()?.chars().next()
    }
    fn putb(&mut self, _ch: char) -> bool {
        false
    }
    fn seek(&mut self, _pos: i64) -> Option<i64> {
        None
    }
    fn tell(&self) -> i64 {
        -1
    }
    fn close(&mut self) {
        self.open = false;
    }
    fn fd(&self) -> Option<i32> {
        Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcueid_core::string::to_rust_string;

    #[test]
    fn string_port_round_trip() {
        let mut c = Interp::new();
        init(&mut c);
        let out = outstring(&mut c, "test-out");
        for ch in "遠野".chars() {
            assert!(backend_mut(out).putb(ch));
        }
        let s = inside(&mut c, out).unwrap();
        assert_eq!(to_rust_string(s), "遠野");
    }

    #[test]
    fn string_reader_drains_then_eof() {
        let mut c = Interp::new();
        init(&mut c);
        let inp = instring(&mut c, "ab", "test-in");
        let b = backend_mut(inp);
        assert!(b.ready());
        assert_eq!(b.getb(), Some('a'));
        assert_eq!(b.getb(), Some('b'));
        assert_eq!(b.getb(), None);
        assert!(!b.ready());
    }

    #[test]
    fn seek_and_tell_on_string_ports() {
        let mut c = Interp::new();
        init(&mut c);
        let inp = instring(&mut c, "abcd", "test-in");
        let b = backend_mut(inp);
        assert_eq!(b.tell(), 0);
        assert_eq!(b.seek(2), Some(2));
        assert_eq!(b.getb(), Some('c'));
        assert_eq!(b.tell(), 3);
    }

    #[test]
    fn closed_ports_refuse_io() {
        let mut c = Interp::new();
        init(&mut c);
        let out = outstring(&mut c, "test-out");
        backend_mut(out).close();
        assert!(backend_mut(out).closed());
        assert!(!backend_mut(out).putb('x'));
    }
}
