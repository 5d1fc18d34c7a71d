//! UCS-4 strings and characters
//!
//! A string cell holds its length and a pointer to a rune array living in
//! its own Immutable block: the collector's linear walk skips it, and the
//! string's sweeper frees it along with the cell. UTF-8 exists only at the
//! boundary (construction from `&str`, conversion back for output).

use crate::interp::Interp;
use crate::value::{has_tag, CellHdr, Tag, Value};

#[repr(C)]
pub struct StrCell {
    pub hdr: CellHdr,
    pub len: usize,
    pub data: *mut char,
}

#[repr(C)]
pub struct CharCell {
    pub hdr: CellHdr,
    pub ch: char,
}

/// String of `len` runes, all NUL; the caller fills the slots.
pub fn mkstring_len(c: &mut Interp, len: usize) -> Value {
    let v = c.alloc_cell(Tag::Str, std::mem::size_of::<StrCell>());
    let Value::Obj(r) = v else { return Value::Nil };
    let color = c.gc.mutator;
    let data = c
        .heap
        .alloc_immutable(len.max(1) * std::mem::size_of::<char>(), color)
        .cast::<char>();
    unsafe {
        let cell = r.cell::<StrCell>();
        if data.is_null() {
            cell.len = 0;
            cell.data = std::ptr::null_mut();
            return Value::Nil;
        }
        for i in 0..len {
            data.add(i).write('\0');
        }
        cell.len = len;
        cell.data = data;
    }
    v
}

pub fn mkstring_runes(c: &mut Interp, runes: &[char]) -> Value {
    let v = mkstring_len(c, runes.len());
    if let Value::Obj(r) = v {
        unsafe {
            let cell = r.cell::<StrCell>();
            for (i, &ch) in runes.iter().enumerate() {
                cell.data.add(i).write(ch);
            }
        }
    }
    v
}

pub fn mkstring(c: &mut Interp, s: &str) -> Value {
    let runes: Vec<char> = s.chars().collect();
    mkstring_runes(c, &runes)
}

pub fn mkchar(c: &mut Interp, ch: char) -> Value {
    let v = c.alloc_cell(Tag::Char, std::mem::size_of::<CharCell>());
    if let Value::Obj(r) = v {
        unsafe { r.cell::<CharCell>().ch = ch }
    }
    v
}

pub fn char_of(v: Value) -> char {
    debug_assert!(has_tag(v, Tag::Char));
    unsafe { v.obj().cell::<CharCell>().ch }
}

pub fn str_len(v: Value) -> usize {
    debug_assert!(has_tag(v, Tag::Str));
    unsafe { v.obj().cell::<StrCell>().len }
}

/// Rune slice view of a string cell. The slice is valid until the string
/// is collected.
pub fn str_chars<'a>(v: Value) -> &'a [char] {
    debug_assert!(has_tag(v, Tag::Str));
    unsafe {
        let cell = v.obj().cell::<StrCell>();
        std::slice::from_raw_parts(cell.data, cell.len)
    }
}

pub fn str_index(v: Value, i: usize) -> char {
    str_chars(v)[i]
}

pub fn str_set_index(v: Value, i: usize, ch: char) {
    debug_assert!(has_tag(v, Tag::Str));
    unsafe {
        let cell = v.obj().cell::<StrCell>();
        debug_assert!(i < cell.len);
        cell.data.add(i).write(ch);
    }
}

pub fn str_eq(a: Value, b: Value) -> bool {
    str_chars(a) == str_chars(b)
}

/// Concatenate two strings into a fresh string.
pub fn strcat(c: &mut Interp, a: Value, b: Value) -> Value {
    let mut runes = Vec::with_capacity(str_len(a) + str_len(b));
    runes.extend_from_slice(str_chars(a));
    runes.extend_from_slice(str_chars(b));
    mkstring_runes(c, &runes)
}

pub fn strcat_char(c: &mut Interp, a: Value, ch: char) -> Value {
    let mut runes = Vec::with_capacity(str_len(a) + 1);
    runes.extend_from_slice(str_chars(a));
    runes.push(ch);
    mkstring_runes(c, &runes)
}

/// Substring `[start, end)` as a fresh string.
pub fn substr(c: &mut Interp, v: Value, start: usize, end: usize) -> Value {
    let chars = str_chars(v);
    mkstring_runes(c, &chars[start..end.min(chars.len())])
}

/// UTF-8 rendition, for ports and host-side diagnostics.
pub fn to_rust_string(v: Value) -> String {
    str_chars(v).iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_round_trip() {
        let mut c = Interp::new();
        let s = mkstring(&mut c, "遠野");
        assert_eq!(str_len(s), 2);
        assert_eq!(str_index(s, 0), '遠');
        assert_eq!(to_rust_string(s), "遠野");
    }

    #[test]
    fn concat_and_substr() {
        let mut c = Interp::new();
        let a = mkstring(&mut c, "foo");
        let b = mkstring(&mut c, "bar");
        let ab = strcat(&mut c, a, b);
        assert_eq!(to_rust_string(ab), "foobar");
        let mid = substr(&mut c, ab, 2, 4);
        assert_eq!(to_rust_string(mid), "ob");
    }

    #[test]
    fn strings_are_mutable_in_place() {
        let mut c = Interp::new();
        let s = mkstring(&mut c, "cat");
        str_set_index(s, 0, 'b');
        assert_eq!(to_rust_string(s), "bat");
    }

    #[test]
    fn content_equality() {
        let mut c = Interp::new();
        let a = mkstring(&mut c, "same");
        let b = mkstring(&mut c, "same");
        let d = mkstring(&mut c, "diff");
        assert!(str_eq(a, b));
        assert!(!str_eq(a, d));
    }
}
