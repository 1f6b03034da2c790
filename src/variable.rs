//! Typed memory cells with change tracking.
//!
//! A `Variable` is one named view of a storage cell. Aliases are handled
//! one level up: the registry may bind several names to the same
//! `Variable`, so the struct itself never knows how many names it has.

use serde::{Deserialize, Serialize};

use crate::addr::Address;

/// Declared value type of a variable.
///
/// `Time` is a word-sized millisecond cell; the source system declares
/// timers `AT %MWn: TIME`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum VarType {
    Bool,
    Byte,
    Word,
    DWord,
    Time,
}

/// A typed scalar, width-matched to the variable it lives in.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Value {
    Bit(bool),
    Byte(u8),
    Word(u16),
    DWord(u32),
}

impl Value {
    pub fn raw(self) -> u32 {
        match self {
            Value::Bit(b) => b as u32,
            Value::Byte(b) => b as u32,
            Value::Word(w) => w as u32,
            Value::DWord(d) => d,
        }
    }

    /// Build a value of the width `var_type` implies, truncating `raw`.
    pub fn for_type(var_type: VarType, raw: u32) -> Value {
        match var_type {
            VarType::Bool => Value::Bit(raw != 0),
            VarType::Byte => Value::Byte(raw as u8),
            VarType::Word | VarType::Time => Value::Word(raw as u16),
            VarType::DWord => Value::DWord(raw),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bit(b) => write!(f, "{}", if *b { 1 } else { 0 }),
            Value::Byte(b) => write!(f, "{b}"),
            Value::Word(w) => write!(f, "{w}"),
            Value::DWord(d) => write!(f, "{d}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Variable {
    pub name: String,
    pub address: Address,
    pub var_type: VarType,
    pub description: String,
    pub value: Option<Value>,
    pub initial_value: Option<Value>,
    pub read_only: bool,
    pub last_value: Option<Value>,
    pub auto_generated: bool,
    changed: bool,
}

impl Variable {
    pub fn new(name: &str, address: Address, var_type: VarType, description: &str) -> Variable {
        Variable {
            name: name.to_string(),
            address,
            var_type,
            description: description.to_string(),
            value: None,
            initial_value: None,
            read_only: false,
            last_value: None,
            auto_generated: false,
            changed: false,
        }
    }

    /// Store a new value, coerced to this variable's width. Flags a change
    /// only on a real transition.
    pub fn set_value(&mut self, value: Value) {
        let value = Value::for_type(self.var_type, value.raw());
        if self.value != Some(value) {
            self.last_value = self.value;
            self.changed = true;
        }
        self.value = Some(value);
    }

    /// One-shot change query: returns the flag and resets it.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    pub fn reset_changed(&mut self) {
        self.changed = false;
    }

    /// True when a bit-typed variable currently holds `true`.
    pub fn is_set(&self) -> bool {
        matches!(self.value, Some(Value::Bit(true)))
    }
}
