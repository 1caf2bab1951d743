//! Machine state tracker.
//!
//! Frame storage is keyed by entry-relative offsets: the stack pointer at
//! method entry is offset 0, and every push or `sub sp` moves the current
//! stack pointer (`sp_delta`) further below it. Stack-pointer relative
//! operands are translated with [`MachineState::frame_offset`] so that pushes,
//! explicit stores and frame-pointer accesses all see the same slots.

use std::collections::BTreeMap;

use ilr_isa::Register;
use ilr_meta::TypeRef;
use rustc_hash::FxHashMap;

use crate::{Constant, ConstantPayload, IrError, Local, Location, Result, Value, ValueId, ValueTable};

/// Symbolic registers, stack and frame of one method lift.
#[derive(Clone, Debug)]
pub struct MachineState {
    pointer_size: i64,
    values: ValueTable,
    registers: FxHashMap<Register, ValueId>,
    /// Frame offsets of explicitly pushed entries, oldest first.
    pushed: Vec<i64>,
    frame: BTreeMap<i64, ValueId>,
    fpu: Vec<Option<ValueId>>,
    sp_delta: i64,
}

impl MachineState {
    #[must_use]
    pub fn new(pointer_size: u8) -> Self {
        Self {
            pointer_size: i64::from(pointer_size),
            values: ValueTable::new(),
            registers: FxHashMap::default(),
            pushed: Vec::new(),
            frame: BTreeMap::new(),
            fpu: Vec::new(),
            sp_delta: 0,
        }
    }

    #[must_use]
    pub const fn values(&self) -> &ValueTable {
        &self.values
    }

    #[must_use]
    pub fn value(&self, id: ValueId) -> Option<&Value> {
        self.values.get(id)
    }

    // ---- registers ----

    #[must_use]
    pub fn get_register(&self, reg: Register) -> Option<ValueId> {
        if reg.is_zero() {
            return None;
        }
        self.registers.get(&reg).copied()
    }

    /// Value bound to a register, resolved through the table.
    #[must_use]
    pub fn register_value(&self, reg: Register) -> Option<&Value> {
        self.get_register(reg).and_then(|id| self.values.get(id))
    }

    /// Bind a register. Writes to the zero register are discarded.
    pub fn set_register(&mut self, reg: Register, value: ValueId) {
        if !reg.is_zero() {
            self.registers.insert(reg, value);
        }
    }

    pub fn clear_register(&mut self, reg: Register) {
        self.registers.remove(&reg);
    }

    /// Forget the contents of every listed register.
    pub fn clobber(&mut self, regs: &[Register]) {
        for reg in regs {
            self.registers.remove(reg);
        }
    }

    // ---- frame ----

    /// Current stack pointer relative to its value at method entry.
    #[must_use]
    pub const fn stack_pointer_delta(&self) -> i64 {
        self.sp_delta
    }

    /// Move the stack pointer without touching the push stack.
    pub const fn adjust_stack_pointer(&mut self, delta: i64) {
        self.sp_delta += delta;
    }

    /// Entry-relative offset of a stack-pointer relative slot.
    #[must_use]
    pub const fn frame_offset(&self, sp_relative: i64) -> i64 {
        self.sp_delta + sp_relative
    }

    #[must_use]
    pub fn get_stack_offset(&self, offset: i64) -> Option<ValueId> {
        self.frame.get(&offset).copied()
    }

    pub fn set_stack_offset(&mut self, offset: i64, value: ValueId) {
        self.frame.insert(offset, value);
    }

    pub fn clear_stack_offset(&mut self, offset: i64) {
        self.frame.remove(&offset);
    }

    // ---- push stack ----

    /// Push a value (or an unknown entry) and move the stack pointer down.
    pub fn push(&mut self, value: Option<ValueId>) {
        self.sp_delta -= self.pointer_size;
        self.pushed.push(self.sp_delta);
        match value {
            Some(value) => {
                self.frame.insert(self.sp_delta, value);
            }
            None => {
                self.frame.remove(&self.sp_delta);
            }
        }
    }

    /// Push `count` entries whose contents are unknown.
    pub fn push_unknown(&mut self, count: usize) {
        for _ in 0..count {
            self.push(None);
        }
    }

    /// Pop the most recently pushed entry. `None` when the entry is unknown or
    /// the push stack is empty.
    pub fn pop(&mut self) -> Option<ValueId> {
        let offset = self.pushed.pop()?;
        self.sp_delta = offset + self.pointer_size;
        self.frame.remove(&offset)
    }

    /// Discard `count` pushed entries, as a caller does after a call.
    ///
    /// # Errors
    ///
    /// Returns [`IrError::StackUnderflow`] if fewer entries were pushed.
    pub fn release_pushed(&mut self, count: usize) -> Result<()> {
        if count > self.pushed.len() {
            return Err(IrError::StackUnderflow {
                requested: count,
                available: self.pushed.len(),
            });
        }
        for _ in 0..count {
            self.pop();
        }
        Ok(())
    }

    #[must_use]
    pub fn pushed_depth(&self) -> usize {
        self.pushed.len()
    }

    /// Value of the pushed entry `from_top` positions below the top.
    #[must_use]
    pub fn peek_pushed(&self, from_top: usize) -> Option<ValueId> {
        let idx = self.pushed.len().checked_sub(from_top + 1)?;
        self.frame.get(&self.pushed[idx]).copied()
    }

    // ---- floating point stack ----

    pub fn fpu_push(&mut self, value: Option<ValueId>) {
        self.fpu.push(value);
    }

    pub fn fpu_pop(&mut self) -> Option<ValueId> {
        self.fpu.pop().flatten()
    }

    #[must_use]
    pub fn fpu_top(&self) -> Option<ValueId> {
        self.fpu.last().copied().flatten()
    }

    #[must_use]
    pub fn fpu_depth(&self) -> usize {
        self.fpu.len()
    }

    // ---- value creation ----

    /// Create a compiler-introduced local and bind it to its location.
    pub fn make_local(
        &mut self,
        ty: Option<TypeRef>,
        location: Option<Location>,
        known_initial: Option<i64>,
    ) -> ValueId {
        let name = self.values.next_local_name();
        self.insert_local(Local {
            name,
            ty,
            known_initial,
            location,
            parameter: None,
            is_this: false,
        })
    }

    /// Create an incoming argument local and bind it to its location.
    pub fn make_parameter(
        &mut self,
        name: &str,
        ty: Option<TypeRef>,
        location: Option<Location>,
        parameter: Option<u16>,
    ) -> ValueId {
        self.insert_local(Local {
            name: name.to_string(),
            ty,
            known_initial: None,
            location,
            parameter,
            is_this: parameter.is_none(),
        })
    }

    fn insert_local(&mut self, local: Local) -> ValueId {
        let location = local.location;
        let id = self.values.push(Value::Local(local));
        match location {
            Some(Location::Register(reg)) => self.set_register(reg, id),
            Some(Location::Stack(offset)) => self.set_stack_offset(offset, id),
            None => {}
        }
        id
    }

    /// Create a constant, binding it to `register` if given.
    pub fn make_constant(&mut self, payload: ConstantPayload, register: Option<Register>) -> ValueId {
        let id = self.values.push(Value::Constant(Constant { payload, register }));
        if let Some(reg) = register {
            self.set_register(reg, id);
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilr_isa::{RAX, RCX};

    #[test]
    fn test_register_binding() {
        let mut state = MachineState::new(8);
        assert!(state.get_register(RAX).is_none());
        let c = state.make_constant(ConstantPayload::Number(5), Some(RAX));
        assert_eq!(state.get_register(RAX), Some(c));
        state.set_register(RCX, c);
        state.clobber(&[RAX]);
        assert!(state.get_register(RAX).is_none());
        assert_eq!(state.get_register(RCX), Some(c));

        state.set_register(Register::Zr, c);
        assert!(state.get_register(Register::Zr).is_none());
    }

    #[test]
    fn test_push_pop_shares_frame() {
        let mut state = MachineState::new(4);
        let a = state.make_constant(ConstantPayload::Number(1), None);
        let b = state.make_constant(ConstantPayload::Number(2), None);
        state.push(Some(a));
        state.push(Some(b));
        assert_eq!(state.stack_pointer_delta(), -8);
        assert_eq!(state.peek_pushed(0), Some(b));
        assert_eq!(state.peek_pushed(1), Some(a));
        // [esp + 4] is the first push
        assert_eq!(state.get_stack_offset(state.frame_offset(4)), Some(a));
        assert_eq!(state.pop(), Some(b));
        assert_eq!(state.stack_pointer_delta(), -4);
    }

    #[test]
    fn test_release_underflow() {
        let mut state = MachineState::new(4);
        state.push_unknown(2);
        assert_eq!(state.pushed_depth(), 2);
        assert!(state.release_pushed(1).is_ok());
        let err = state.release_pushed(3).unwrap_err();
        assert_eq!(
            err,
            IrError::StackUnderflow {
                requested: 3,
                available: 1
            }
        );
        // a failed release leaves the stack untouched
        assert_eq!(state.pushed_depth(), 1);
    }

    #[test]
    fn test_store_into_reserved_slot() {
        let mut state = MachineState::new(4);
        state.push_unknown(1);
        let v = state.make_constant(ConstantPayload::Number(9), None);
        let offset = state.frame_offset(0);
        state.set_stack_offset(offset, v);
        assert_eq!(state.peek_pushed(0), Some(v));
    }

    #[test]
    fn test_make_local_binds_location() {
        let mut state = MachineState::new(8);
        let l = state.make_local(None, Some(Location::Stack(-0x10)), Some(3));
        assert_eq!(state.get_stack_offset(-0x10), Some(l));
        assert_eq!(state.value(l).and_then(Value::known_number), Some(3));
        let this = state.make_parameter("this", None, Some(Location::Register(RCX)), None);
        assert!(state.value(this).and_then(Value::as_local).is_some_and(|l| l.is_this));
    }
}
