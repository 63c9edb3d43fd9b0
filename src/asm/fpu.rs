//! Simulation of the x87 floating-point register stack.
//!
//! The emitter addresses floating-point values by virtual register
//! number while the hardware addresses them by distance from the top of
//! the register stack. This simulator tracks where each virtual
//! register currently lives so the emitter can translate between the
//! two and emit matching `fxch` instructions. Mutations touch only the
//! slots named by the caller, mirroring the real register renaming.

/// The number of registers in the floating-point unit.
pub const NOF_FPU_REGS: usize = 8;

/// Maps virtual floating-point registers to stack positions.
pub struct FpuStack {
    /// One-based stack depth per register, 0 when not on the stack
    offset: [i32; NOF_FPU_REGS],
    /// The number of registers currently on the stack
    count: i32,
}

impl FpuStack {
    /// Create a new empty register stack.
    pub fn new() -> Self {
        Self {
            offset: [0; NOF_FPU_REGS],
            count: 0,
        }
    }

    /// Push the specified register onto the stack.
    pub fn push(&mut self, rnr: usize) {
        assert!((self.count as usize) < NOF_FPU_REGS, "stack overflow");
        assert!(self.offset[rnr] == 0, "register already on stack");
        self.count += 1;
        self.offset[rnr] = self.count;
    }

    /// Pop the specified register off the stack. The register must be
    /// on top.
    pub fn pop(&mut self, rnr: usize) {
        assert!(self.offset[rnr] == self.count, "register not on top of stack");
        self.offset[rnr] = 0;
        self.count -= 1;
    }

    /// Bring the specified register on top of the stack and return the
    /// distance to pass to the hardware exchange instruction, or 0 if
    /// the register already is on top.
    pub fn bring_on_top(&mut self, rnr: usize) -> i32 {
        assert!(self.offset[rnr] != 0, "register not on stack");
        let delta = self.count - self.offset[rnr];
        if delta != 0 {
            let top = self.top_register();
            self.offset.swap(top, rnr);
        }
        delta
    }

    /// Exchange the two topmost registers.
    pub fn swap_two_on_top(&mut self) {
        assert!(self.count >= 2, "not enough registers on stack");
        let top = self.top_register();
        let below = self.register_at(1);
        self.offset.swap(top, below);
    }

    /// Arrange two registers in the top two stack slots, leaving `b` on
    /// top and `a` directly below it. When `ordered` is false an
    /// existing reversed arrangement is accepted as is. Returns the
    /// exchange distances to emit, in order.
    pub fn two_on_top(&mut self, a: usize, b: usize, ordered: bool) -> Vec<i32> {
        let mut swaps = Vec::new();
        if self.is_stack_pos(b, 0) && self.is_stack_pos(a, 1) {
            return swaps;
        }
        if self.is_stack_pos(a, 0) && self.is_stack_pos(b, 1) {
            if ordered {
                self.swap_two_on_top();
                swaps.push(1);
            }
            return swaps;
        }
        let delta = self.bring_on_top(a);
        if delta != 0 {
            swaps.push(delta);
        }
        self.swap_two_on_top();
        swaps.push(1);
        let delta = self.bring_on_top(b);
        if delta != 0 {
            swaps.push(delta);
        }
        swaps
    }

    /// Get the distance of the specified register from the top.
    pub fn offset_of(&self, rnr: usize) -> i32 {
        assert!(self.offset[rnr] != 0, "register not on stack");
        self.count - self.offset[rnr]
    }

    /// Check if a register is at the given distance from the top.
    pub fn is_stack_pos(&self, rnr: usize, offset: i32) -> bool {
        self.offset[rnr] == self.count - offset
    }

    /// Check if the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Clear the stack at points where its contents cannot be relied
    /// upon across control flow.
    pub fn clear(&mut self) {
        self.offset = [0; NOF_FPU_REGS];
        self.count = 0;
    }

    fn top_register(&self) -> usize {
        self.register_at(0)
    }

    fn register_at(&self, depth_from_top: i32) -> usize {
        let wanted = self.count - depth_from_top;
        for (rnr, &depth) in self.offset.iter().enumerate() {
            if depth == wanted {
                return rnr;
            }
        }
        panic!("no register at stack position {}", depth_from_top);
    }
}

impl Default for FpuStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut fpu = FpuStack::new();
        assert!(fpu.is_empty());
        fpu.push(2);
        fpu.push(4);
        assert_eq!(fpu.offset_of(4), 0);
        assert_eq!(fpu.offset_of(2), 1);
        fpu.pop(4);
        fpu.pop(2);
        assert!(fpu.is_empty());
    }

    #[test]
    fn test_bring_on_top() {
        let mut fpu = FpuStack::new();
        fpu.push(3);
        fpu.push(5);
        assert_eq!(fpu.bring_on_top(3), 1);
        assert_eq!(fpu.offset_of(3), 0);
        assert_eq!(fpu.offset_of(5), 1);
        // Already on top, no exchange needed.
        assert_eq!(fpu.bring_on_top(3), 0);
    }

    #[test]
    fn test_swap_two_on_top() {
        let mut fpu = FpuStack::new();
        fpu.push(0);
        fpu.push(1);
        fpu.push(2);
        fpu.swap_two_on_top();
        assert_eq!(fpu.offset_of(1), 0);
        assert_eq!(fpu.offset_of(2), 1);
        assert_eq!(fpu.offset_of(0), 2);
    }

    #[test]
    fn test_two_on_top() {
        let mut fpu = FpuStack::new();
        fpu.push(0);
        fpu.push(1);
        fpu.push(2);
        fpu.push(3);
        let swaps = fpu.two_on_top(0, 2, true);
        assert!(!swaps.is_empty());
        assert_eq!(fpu.offset_of(2), 0);
        assert_eq!(fpu.offset_of(0), 1);

        // Reversed top two is accepted when order does not matter.
        let mut fpu = FpuStack::new();
        fpu.push(6);
        fpu.push(7);
        assert!(fpu.two_on_top(7, 6, false).is_empty());
    }

    #[test]
    fn test_positions_stay_consistent() {
        let mut fpu = FpuStack::new();
        fpu.push(1);
        fpu.push(3);
        fpu.push(6);
        fpu.bring_on_top(1);
        fpu.swap_two_on_top();
        for rnr in [1usize, 3, 6] {
            assert!(fpu.is_stack_pos(rnr, fpu.offset_of(rnr)));
        }
    }
}
