//! Hash tables
//!
//! Open addressing over a power-of-two slot array. The slot array lives in
//! an Immutable block owned by the table cell; each occupied slot holds a
//! bucket cell `{key, val, owner, index}` so the collector can reclaim
//! entries individually — sweeping a bucket writes a tombstone back into
//! the owner's slot, keeping the table free of dangling pointers.
//!
//! Slot states: `Unbound` = never used, `Undef` = tombstone (deleted or
//! swept), anything else = a bucket. Probes skip tombstones and stop at
//! `Unbound`.

use std::hash::{DefaultHasher, Hasher};

use crate::interp::Interp;
use crate::types::{hash_value, is};
use crate::value::{has_tag, CellHdr, Tag, Value};

#[repr(C)]
pub struct TableCell {
    pub hdr: CellHdr,
    pub slots: *mut Value,
    pub nslots: usize,
    pub count: usize,
}

#[repr(C)]
pub struct BucketCell {
    pub hdr: CellHdr,
    pub key: Value,
    pub val: Value,
    pub owner: Value,
    pub index: usize,
}

/// Table with `1 << hashbits` initial slots.
pub fn mktable(c: &mut Interp, hashbits: u32) -> Value {
    mktable_tagged(c, Tag::Table, hashbits)
}

/// Weak table: entries are not retained by the collector.
pub fn mkwtable(c: &mut Interp, hashbits: u32) -> Value {
    mktable_tagged(c, Tag::WTable, hashbits)
}

fn mktable_tagged(c: &mut Interp, tag: Tag, hashbits: u32) -> Value {
    let nslots = 1usize << hashbits;
    let v = c.alloc_cell(tag, std::mem::size_of::<TableCell>());
    let Value::Obj(r) = v else { return Value::Nil };
    let slots = alloc_slots(c, nslots);
    unsafe {
        let cell = r.cell::<TableCell>();
        if slots.is_null() {
            cell.slots = std::ptr::null_mut();
            cell.nslots = 0;
            cell.count = 0;
            return Value::Nil;
        }
        cell.slots = slots;
        cell.nslots = nslots;
        cell.count = 0;
    }
    v
}

fn alloc_slots(c: &mut Interp, nslots: usize) -> *mut Value {
    let color = c.gc.mutator;
    let p = c
        .heap
        .alloc_immutable(nslots * std::mem::size_of::<Value>(), color)
        .cast::<Value>();
    if !p.is_null() {
        for i in 0..nslots {
            unsafe { p.add(i).write(Value::Unbound) }
        }
    }
    p
}

pub fn is_table(v: Value) -> bool {
    has_tag(v, Tag::Table) || has_tag(v, Tag::WTable)
}

fn table_cell<'a>(tbl: Value) -> &'a mut TableCell {
    debug_assert!(is_table(tbl));
    unsafe { tbl.obj().cell::<TableCell>() }
}

fn hash_of(c: &mut Interp, key: Value) -> u64 {
    let mut h = DefaultHasher::new();
    hash_value(c, key, &mut h);
    h.finish()
}

/// Probe for `key`. Returns `Ok(slot_index_of_bucket)` on a hit,
/// `Err(insertion_index)` on a miss (reusing the first tombstone seen).
fn probe(c: &mut Interp, tbl: Value, key: Value) -> Result<usize, usize> {
    let t = table_cell(tbl);
    let mask = t.nslots - 1;
    let mut idx = (hash_of(c, key) as usize) & mask;
    let mut tombstone = None;
    for _ in 0..t.nslots {
        let slot = unsafe { *t.slots.add(idx) };
        match slot {
            Value::Unbound => return Err(tombstone.unwrap_or(idx)),
            Value::Undef => {
                tombstone.get_or_insert(idx);
            }
            bucket => {
                let bkey = unsafe { bucket.obj().cell::<BucketCell>().key };
                if is(c, bkey, key) {
                    return Ok(idx);
                }
            }
        }
        idx = (idx + 1) & mask;
    }
    // every slot is a bucket or tombstone; reuse a tombstone if any
    Err(tombstone.unwrap_or(idx))
}

/// Look up `key`; `Unbound` when absent.
pub fn lookup(c: &mut Interp, tbl: Value, key: Value) -> Value {
    match probe(c, tbl, key) {
        Ok(idx) => unsafe {
            let bucket = *table_cell(tbl).slots.add(idx);
            bucket.obj().cell::<BucketCell>().val
        },
        Err(_) => Value::Unbound,
    }
}

/// Look up `key` and return the bucket cell itself; the collector's symbol
/// marking needs the bucket, not the value.
pub fn lookup_bucket(c: &mut Interp, tbl: Value, key: Value) -> Value {
    match probe(c, tbl, key) {
        Ok(idx) => unsafe { *table_cell(tbl).slots.add(idx) },
        Err(_) => Value::Unbound,
    }
}

/// Insert or update a binding. Returns `val`.
pub fn insert(c: &mut Interp, tbl: Value, key: Value, val: Value) -> Value {
    {
        let t = table_cell(tbl);
        if (t.count + 1) * 10 > t.nslots * 7 {
            grow(c, tbl);
        }
    }
    match probe(c, tbl, key) {
        Ok(idx) => unsafe {
            let bucket = *table_cell(tbl).slots.add(idx);
            bucket.obj().cell::<BucketCell>().val = val;
        },
        Err(idx) => {
            let bucket = mkbucket(c, key, val, tbl, idx);
            if bucket.is_nil() {
                return Value::Nil;
            }
            let t = table_cell(tbl);
            unsafe { t.slots.add(idx).write(bucket) };
            t.count += 1;
        }
    }
    val
}

/// Remove a binding, leaving a tombstone so probe chains stay intact.
/// Returns the removed value, or `Unbound`.
pub fn delete(c: &mut Interp, tbl: Value, key: Value) -> Value {
    match probe(c, tbl, key) {
        Ok(idx) => {
            let t = table_cell(tbl);
            let bucket = unsafe { *t.slots.add(idx) };
            let val = unsafe { bucket.obj().cell::<BucketCell>().val };
            unsafe { t.slots.add(idx).write(Value::Undef) };
            t.count -= 1;
            val
        }
        Err(_) => Value::Unbound,
    }
}

pub fn count(tbl: Value) -> usize {
    table_cell(tbl).count
}

/// Snapshot of the live entries, for iteration that may allocate.
pub fn entries(tbl: Value) -> Vec<(Value, Value)> {
    let t = table_cell(tbl);
    let mut out = Vec::with_capacity(t.count);
    for i in 0..t.nslots {
        let slot = unsafe { *t.slots.add(i) };
        if let Value::Obj(r) = slot {
            let b = unsafe { r.cell::<BucketCell>() };
            out.push((b.key, b.val));
        }
    }
    out
}

/// Snapshot of the bucket cells, for the collector's table marking.
pub fn buckets(tbl: Value) -> Vec<Value> {
    let t = table_cell(tbl);
    let mut out = Vec::with_capacity(t.count);
    for i in 0..t.nslots {
        let slot = unsafe { *t.slots.add(i) };
        if matches!(slot, Value::Obj(_)) {
            out.push(slot);
        }
    }
    out
}

fn mkbucket(c: &mut Interp, key: Value, val: Value, owner: Value, index: usize) -> Value {
    let v = c.alloc_cell(Tag::TBucket, std::mem::size_of::<BucketCell>());
    if let Value::Obj(r) = v {
        unsafe {
            let cell = r.cell::<BucketCell>();
            cell.key = key;
            cell.val = val;
            cell.owner = owner;
            cell.index = index;
        }
    }
    v
}

/// Double the slot array, rehashing every live bucket and dropping
/// tombstones.
fn grow(c: &mut Interp, tbl: Value) {
    let (old_slots, old_n) = {
        let t = table_cell(tbl);
        (t.slots, t.nslots)
    };
    let new_n = old_n * 2;
    let new_slots = alloc_slots(c, new_n);
    if new_slots.is_null() {
        return;
    }
    let mask = new_n - 1;
    for i in 0..old_n {
        let slot = unsafe { *old_slots.add(i) };
        if let Value::Obj(r) = slot {
            let b = unsafe { r.cell::<BucketCell>() };
            let mut idx = (hash_of(c, b.key) as usize) & mask;
            loop {
                let dst = unsafe { *new_slots.add(idx) };
                if dst == Value::Unbound {
                    break;
                }
                idx = (idx + 1) & mask;
            }
            unsafe { new_slots.add(idx).write(slot) };
            let b = unsafe { r.cell::<BucketCell>() };
            b.index = idx;
        }
    }
    let t = table_cell(tbl);
    t.slots = new_slots;
    t.nslots = new_n;
    c.heap.free(old_slots.cast());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string::mkstring;

    #[test]
    fn insert_lookup_delete() {
        let mut c = Interp::new();
        let t = mktable(&mut c, 3);
        insert(&mut c, t, Value::Fixnum(1), Value::Fixnum(100));
        insert(&mut c, t, Value::Fixnum(2), Value::Fixnum(200));
        assert_eq!(lookup(&mut c, t, Value::Fixnum(1)), Value::Fixnum(100));
        assert_eq!(lookup(&mut c, t, Value::Fixnum(3)), Value::Unbound);
        assert_eq!(delete(&mut c, t, Value::Fixnum(1)), Value::Fixnum(100));
        assert_eq!(lookup(&mut c, t, Value::Fixnum(1)), Value::Unbound);
        assert_eq!(count(t), 1);
    }

    #[test]
    fn string_keys_compare_by_content() {
        let mut c = Interp::new();
        let t = mktable(&mut c, 3);
        let k1 = mkstring(&mut c, "key");
        insert(&mut c, t, k1, Value::Fixnum(7));
        let k2 = mkstring(&mut c, "key");
        assert_eq!(lookup(&mut c, t, k2), Value::Fixnum(7));
    }

    #[test]
    fn growth_preserves_bindings() {
        let mut c = Interp::new();
        let t = mktable(&mut c, 2);
        for i in 0..100 {
            insert(&mut c, t, Value::Fixnum(i), Value::Fixnum(i * 10));
        }
        assert_eq!(count(t), 100);
        for i in 0..100 {
            assert_eq!(lookup(&mut c, t, Value::Fixnum(i)), Value::Fixnum(i * 10));
        }
    }

    #[test]
    fn update_replaces_in_place() {
        let mut c = Interp::new();
        let t = mktable(&mut c, 3);
        insert(&mut c, t, Value::Fixnum(1), Value::Fixnum(1));
        insert(&mut c, t, Value::Fixnum(1), Value::Fixnum(2));
        assert_eq!(count(t), 1);
        assert_eq!(lookup(&mut c, t, Value::Fixnum(1)), Value::Fixnum(2));
    }

    #[test]
    fn probing_continues_past_tombstones() {
        let mut c = Interp::new();
        let t = mktable(&mut c, 2);
        for i in 0..4 {
            insert(&mut c, t, Value::Fixnum(i), Value::Fixnum(i));
        }
        delete(&mut c, t, Value::Fixnum(0));
        delete(&mut c, t, Value::Fixnum(1));
        for i in 2..4 {
            assert_eq!(lookup(&mut c, t, Value::Fixnum(i)), Value::Fixnum(i));
        }
    }
}
