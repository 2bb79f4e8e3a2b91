//! Per-function symbol tables (component C4) and the process-wide
//! function table (component C5).

use crate::common::{Id, Map};
use crate::middle::ilist::LabelId;

/// An entry in a function's symbol table: either a stack slot (a source
/// variable or a compiler-generated temporary) or a label.
#[derive(Clone, Copy, Debug)]
pub enum SymbolEntry {
    Var(isize),
    Label(LabelId),
}

/// Well-known name for the synthetic return slot, offset `-2` in every
/// function's frame (spec.md §4.2, §4.6).
pub const RETVAL_NAME: &str = "$retval";

/// A single function's symbol table. Parameters and `$retval` are
/// inserted at negative offsets when the function header is compiled;
/// ordinary variables and compiler temporaries get the next positive
/// offset as they're first assigned.
#[derive(Default)]
pub struct SymbolTable {
    entries: Map<Id, SymbolEntry>,
    /// Count of user (and temporary) variables with positive offsets.
    /// The next one allocated gets offset `item_count + 1`.
    item_count: usize,
    temp_counter: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: Id) -> Option<SymbolEntry> {
        self.entries.get(&name).copied()
    }

    pub fn insert_var_at(&mut self, name: Id, offset: isize) {
        self.entries.insert(name, SymbolEntry::Var(offset));
    }

    pub fn insert_label(&mut self, name: Id, label: LabelId) {
        self.entries.insert(name, SymbolEntry::Label(label));
    }

    /// Allocates a new local variable slot at the next free positive
    /// offset and records it under `name`.
    pub fn declare_local(&mut self, name: Id) -> isize {
        self.item_count += 1;
        let offset = self.item_count as isize;
        self.entries.insert(name, SymbolEntry::Var(offset));
        offset
    }

    /// Allocates an anonymous temporary (`$T<n>`, reset per function) and
    /// returns its offset.
    pub fn declare_temp(&mut self) -> isize {
        let name: Id = internment::Intern::new(format!("$T{}", self.temp_counter));
        self.temp_counter += 1;
        self.declare_local(name)
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }
}

/// A compiled function's descriptor (component C5's payload).
pub struct FunctionDescriptor {
    pub name: Id,
    /// Declared parameter count. `$main`'s sentinel value is `-1`, per
    /// spec.md §3.
    pub param_count: isize,
    pub symtab: SymbolTable,
    /// Address of the function's entry `LABEL`, set once pass 2 compiles
    /// the body.
    pub first_instruction: Option<usize>,
    /// Address of the function body's final `LABEL` — the target every
    /// intra-function `return` jumps to.
    pub last_instruction: Option<usize>,
}

impl FunctionDescriptor {
    pub fn new(name: Id, param_count: isize) -> Self {
        FunctionDescriptor {
            name,
            param_count,
            symtab: SymbolTable::new(),
            first_instruction: None,
            last_instruction: None,
        }
    }
}

/// Synthetic name for the top-level body's function descriptor.
pub const MAIN_FUNCTION_NAME: &str = "$main";

/// Process-wide (here: compile-wide) map from function name to
/// descriptor.
#[derive(Default)]
pub struct FunctionTable {
    functions: Map<Id, FunctionDescriptor>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: Id) -> bool {
        self.functions.contains_key(&name)
    }

    pub fn insert(&mut self, descriptor: FunctionDescriptor) {
        self.functions.insert(descriptor.name, descriptor);
    }

    pub fn get(&self, name: Id) -> Option<&FunctionDescriptor> {
        self.functions.get(&name)
    }

    pub fn get_mut(&mut self, name: Id) -> Option<&mut FunctionDescriptor> {
        self.functions.get_mut(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use internment::Intern;

    #[test]
    fn locals_get_increasing_positive_offsets() {
        let mut t = SymbolTable::new();
        let a = t.declare_local(Intern::new("a".to_string()));
        let b = t.declare_local(Intern::new("b".to_string()));
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(t.item_count(), 2);
    }

    #[test]
    fn temp_names_are_unique_within_a_function() {
        let mut t = SymbolTable::new();
        let o1 = t.declare_temp();
        let o2 = t.declare_temp();
        assert_ne!(o1, o2);
    }
}
