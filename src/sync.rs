//! Cross-granularity value propagation.
//!
//! After a write lands in one variable, the sibling views of the same
//! storage must show the same bit pattern: a word pushes into its bytes
//! and their bits, a byte recomposes its parent word, a bit recomposes
//! its byte and then the word. Each routine only ever calls "upward", so
//! there is no ping-pong and no recursion guard is needed. Cells that
//! were never declared are silently skipped.
//!
//! All functions run inside the registry's critical section.

use crate::addr::{Address, Base, WordOrder};
use crate::registry::RegistryInner;
use crate::variable::Value;

fn cell_key(base: Base, index: u16) -> String {
    Address::new(base, index, None).canonical_key()
}

fn bit_key(byte_index: u16, bit: u8) -> String {
    Address::new(Base::Bit, byte_index, Some(bit)).canonical_key()
}

/// Word `w` changed: push into `MB(2w)` / `MB(2w+1)` and their bits.
pub(crate) fn word_to_bytes_bits(inner: &mut RegistryInner, word_index: u16) {
    let word_val = match inner.value_at(&cell_key(Base::Word, word_index)) {
        Some(v) => v.raw() as u16,
        None => return,
    };
    let Some(low_index) = word_index.checked_mul(2) else {
        return;
    };
    let Some(high_index) = low_index.checked_add(1) else {
        return;
    };

    let low = (word_val & 0xFF) as u8;
    let high = (word_val >> 8) as u8;

    inner.set_at(&cell_key(Base::Byte, low_index), Value::Byte(low));
    inner.set_at(&cell_key(Base::Byte, high_index), Value::Byte(high));

    byte_to_bits(inner, low_index, low);
    byte_to_bits(inner, high_index, high);
}

/// Push a byte value into its 8 bit children. Only acts when the byte
/// cell itself is registered.
fn byte_to_bits(inner: &mut RegistryInner, byte_index: u16, byte_val: u8) {
    if inner.value_at(&cell_key(Base::Byte, byte_index)).is_none() {
        return;
    }
    for bit in 0..8 {
        let set = (byte_val >> bit) & 1 == 1;
        inner.set_at(&bit_key(byte_index, bit), Value::Bit(set));
    }
}

/// Byte `b` changed: recompose the sibling pair into parent word `b/2`.
/// Does not cascade back into bits; the byte was already set by the
/// caller before this runs.
pub(crate) fn byte_to_word(inner: &mut RegistryInner, byte_index: u16) {
    let parent = byte_index / 2;
    let Some(low_index) = parent.checked_mul(2) else {
        return;
    };
    let Some(high_index) = low_index.checked_add(1) else {
        return;
    };

    let low = inner
        .value_at(&cell_key(Base::Byte, low_index))
        .map(|v| v.raw() as u8)
        .unwrap_or(0);
    let high = inner
        .value_at(&cell_key(Base::Byte, high_index))
        .map(|v| v.raw() as u8)
        .unwrap_or(0);

    let word = ((high as u16) << 8) | low as u16;
    inner.set_at(&cell_key(Base::Word, parent), Value::Word(word));
}

/// Bit `(b, k)` changed: recompose byte `b` from all 8 bit children
/// (unset bits read as 0), then recompose the parent word.
pub(crate) fn bit_to_byte_word(inner: &mut RegistryInner, byte_index: u16) {
    let mut byte_val: u8 = 0;
    for bit in 0..8 {
        if let Some(Value::Bit(true)) = inner.value_at(&bit_key(byte_index, bit)) {
            byte_val |= 1 << bit;
        }
    }
    inner.set_at(&cell_key(Base::Byte, byte_index), Value::Byte(byte_val));
    byte_to_word(inner, byte_index);
}

/// DWord `i` changed: update the raw word pair `(i, i+1)`. Intentionally
/// shallow: byte/bit children of those words are not re-expanded. Callers
/// needing bit-level consistency declare the sub-words explicitly.
pub(crate) fn dword_to_words(inner: &mut RegistryInner, index: u16, order: WordOrder) {
    let dword = match inner.value_at(&cell_key(Base::DoubleWord, index)) {
        Some(v) => v.raw(),
        None => return,
    };
    let Some(second) = index.checked_add(1) else {
        return;
    };

    let lo = (dword & 0xFFFF) as u16;
    let hi = (dword >> 16) as u16;
    let (first_val, second_val) = match order {
        WordOrder::LowFirst => (lo, hi),
        WordOrder::HighFirst => (hi, lo),
    };

    inner.set_at(&cell_key(Base::Word, index), Value::Word(first_val));
    inner.set_at(&cell_key(Base::Word, second), Value::Word(second_val));
}
