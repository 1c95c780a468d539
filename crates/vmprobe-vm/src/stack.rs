//! Value stack
//!
//! A single frame of slots addressed from the base. Positions here are
//! 0-based; the 1-based and negative index conventions are resolved by
//! [`VmState`](crate::VmState).

use crate::value::Value;
use crate::{VmError, VmResult};

pub(crate) struct Stack {
    slots: Vec<Value>,
    max_slots: usize,
}

impl Stack {
    pub(crate) fn with_capacity(max_slots: usize) -> Self {
        Self {
            slots: Vec::with_capacity(max_slots.min(64)),
            max_slots,
        }
    }

    /// Push a value onto the stack
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackOverflow` if the stack is full.
    #[inline]
    pub(crate) fn push(&mut self, value: Value) -> VmResult<()> {
        if self.slots.len() >= self.max_slots {
            return Err(VmError::StackOverflow);
        }
        self.slots.push(value);
        Ok(())
    }

    /// Pop the top value
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackUnderflow` if the stack is empty.
    #[inline]
    pub(crate) fn pop(&mut self) -> VmResult<Value> {
        self.slots.pop().ok_or(VmError::StackUnderflow)
    }

    #[inline]
    pub(crate) fn get(&self, pos: usize) -> Option<Value> {
        self.slots.get(pos).copied()
    }

    /// Resize to `depth` slots, filling new slots with nil
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackOverflow` if `depth` exceeds the limit.
    pub(crate) fn set_depth(&mut self, depth: usize) -> VmResult<()> {
        if depth > self.max_slots {
            return Err(VmError::StackOverflow);
        }
        self.slots.resize(depth, Value::Nil);
        Ok(())
    }

    #[inline]
    pub(crate) fn depth(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn max_slots(&self) -> usize {
        self.max_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut stack = Stack::with_capacity(8);
        stack.push(Value::Number(1.0)).unwrap();
        stack.push(Value::Boolean(true)).unwrap();

        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.pop().unwrap(), Value::Boolean(true));
        assert_eq!(stack.get(0), Some(Value::Number(1.0)));
        assert_eq!(stack.get(1), None);
    }

    #[test]
    fn test_overflow_and_underflow() {
        let mut stack = Stack::with_capacity(1);
        stack.push(Value::Nil).unwrap();
        assert!(matches!(stack.push(Value::Nil), Err(VmError::StackOverflow)));

        stack.pop().unwrap();
        assert!(matches!(stack.pop(), Err(VmError::StackUnderflow)));
    }

    #[test]
    fn test_set_depth() {
        let mut stack = Stack::with_capacity(4);
        stack.set_depth(3).unwrap();
        assert_eq!(stack.depth(), 3);
        assert_eq!(stack.get(2), Some(Value::Nil));

        stack.set_depth(1).unwrap();
        assert_eq!(stack.depth(), 1);

        assert!(matches!(stack.set_depth(5), Err(VmError::StackOverflow)));
        assert_eq!(stack.max_slots(), 4);
    }
}
